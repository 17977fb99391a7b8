pub mod decision;
pub mod definition;
pub mod inbox;
pub mod workflow;

use console::style;
use ppm::WorkflowError;
use serde::Serialize;
use std::fmt::Display;

/// Status line on stderr so stdout stays machine readable
pub fn info(message: impl Display) {
    eprintln!("{} {}", style("->").cyan(), message);
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), WorkflowError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
