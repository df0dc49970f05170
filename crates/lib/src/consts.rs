//! Well-known names shared across the engine.

pub const APP_NAME: &str = "dcc";

/// Prefix of properties supplied by the executor at run time (`${dcc.*}`).
pub const PREDEFINED_PREFIX: &str = "dcc.";

/// Capability definition id that marks a unit as a host unit.
pub const AGENT_ENDPOINT_CAPABILITY: &str = "dcc.agent.endpoint";

/// Attribute keys read from an agent endpoint capability.
pub const AGENT_HOST_KEY: &str = "host";
pub const AGENT_PORT_KEY: &str = "port";

pub const DEFAULT_AGENT_PORT: u16 = 8443;

/// Technical properties written when a binding is resolved.
pub const UNIT_ID_PROPERTY: &str = "_unit.id";
pub const CAPABILITY_ID_PROPERTY: &str = "_capability.id";
pub const CAPABILITY_DEFINITION_PROPERTY: &str = "_capability.definition";

/// Deployment property overriding the deployment id.
pub const DEPLOYMENT_ID_PROPERTY: &str = "dcc.deployment.id";

/// Deployment property overriding the local target base directory.
pub const LOCAL_TARGET_DIR_PROPERTY: &str = "dcc.local.target.dir";

/// Environment variable overriding the local target base directory.
pub const LOCAL_TARGET_DIR_ENV: &str = "DCC_LOCAL_TARGET_DIR";

/// Environment variable overriding the work root.
pub const WORK_DIR_ENV: &str = "DCC_WORK_DIR";

/// Agents older than this are refused.
pub const MIN_AGENT_VERSION: &str = "2.0.0";

/// Agents older than this still work but produce a warning.
pub const RECOMMENDED_AGENT_VERSION: &str = "2.4.0";

/// Top-level solution folders shipped to an agent on initialize.
pub const SOLUTION_FOLDERS: &[&str] = &["lib", "packages", "hooks", "custom", "extensions", "external"];

/// Log fetched when a requested log is not available.
pub const FALLBACK_LOG_NAME: &str = "agent.log";
