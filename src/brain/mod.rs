use backtrace::Backtrace;
use std::fmt::{Display, Formatter};

pub mod controller;
pub mod events;
pub mod forecast;
pub mod schedule;
pub mod state;
pub mod thermal;

#[derive(Debug)]
pub struct ControlFailure {
    description: String,
    trace: Backtrace,
    line_num: u32,
    file_name: String,
}

impl ControlFailure {
    pub fn new(description: String, trace: Backtrace, line_num: u32, file_name: String) -> Self {
        ControlFailure {
            description,
            trace,
            line_num,
            file_name,
        }
    }
}

impl Display for ControlFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ControlFailure occured: '{}'", self.description)?;
        writeln!(f, "At: Line {} in {}", self.line_num, self.file_name)?;
        writeln!(f, "Trace:{:?}", self.trace)
    }
}

impl std::error::Error for ControlFailure {}

#[macro_export]
macro_rules! control_fail {
    ($msg:expr) => {{
        let trace = backtrace::Backtrace::new();
        $crate::brain::ControlFailure::new($msg.to_string(), trace, line!(), file!().to_owned())
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn control_fail_records_location() {
        let failure = control_fail!("No segment");
        assert_eq!(failure.description, "No segment");
        let message = failure.to_string();
        assert!(message.contains("No segment"));
        assert!(message.contains("src/brain/mod.rs") || message.contains("src\\brain\\mod.rs"));
    }
}
