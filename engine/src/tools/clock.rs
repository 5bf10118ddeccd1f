use async_trait::async_trait;
use chrono::Local;
use sdk::types::ToolError;

use super::{ActionInput, InputContract, Tool};

/// Reports the local date and time.
#[derive(Debug, Default)]
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "Get Current Date and Time"
    }

    fn description(&self) -> &str {
        "Returns the current local date and time. Input is ignored."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::Ignored
    }

    async fn invoke(&self, _input: ActionInput) -> Result<String, ToolError> {
        let now = Local::now();
        Ok(format!(
            "Current date and time is: {}",
            now.format("%Y-%m-%d %H:%M:%S %:z (%A)")
        ))
    }
}
