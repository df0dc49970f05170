//! Implementation of the `dcc validate` command.

use anyhow::{Result, bail};

use dcc_lib::validate::{ValidateOptions, ValidationError, validate};

use crate::ProfileArgs;
use crate::output::{print_done, print_field, print_problem, print_warning};

pub fn cmd_validate(args: &ProfileArgs, strict: bool, verbose: bool) -> Result<()> {
  let profile = super::load(args)?;

  match validate(&profile, ValidateOptions { strict }) {
    Ok(report) => {
      for warning in &report.warnings {
        print_warning(warning);
      }
      print_done(&format!("Profile '{}' is valid", profile.name()));
      if verbose {
        print_field("Type", &format!("{:?}", profile.profile_type()));
        print_field("Units", &profile.units().count().to_string());
        print_field("Bindings", &profile.bindings().len().to_string());
        print_field("Warnings", &report.warnings.len().to_string());
      }
      Ok(())
    }
    Err(ValidationError::Failed { count, report }) => {
      print_problem(&format!("Profile '{}' has {} error(s)", profile.name(), count));
      eprintln!("{report}");
      bail!("validation failed");
    }
    Err(e) => Err(e.into()),
  }
}
