use crate::bus::CommandBus;
use crate::error::AgentError;
use crate::types::live::{FunctionCall, FunctionResponse, ToolOutcome, ToolResult};
use crate::types::{tools, Command};

fn string_arg<'a>(call: &'a FunctionCall, arg: &str) -> Result<&'a str, AgentError> {
    call.args
        .get(arg)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AgentError::ToolExecution {
            tool: call.name.clone(),
            reason: format!("missing string argument `{arg}`"),
        })
}

/// The command a tool call stands for.
pub fn command_for(call: &FunctionCall) -> Result<Command, AgentError> {
    match call.name.as_str() {
        tools::NAVIGATE => Ok(Command::navigate(string_arg(call, "page")?)),
        tools::CHANGE_THEME => Ok(Command::change_theme(string_arg(call, "mode")?)),
        tools::TOGGLE_AUTO_SCROLL => Ok(Command::toggle_auto_scroll(
            string_arg(call, "action")?.into(),
        )),
        tools::SET_ACCENT_COLOR => Ok(Command::set_accent_color(string_arg(call, "color")?)),
        _ => Err(AgentError::ToolExecution {
            tool: call.name.clone(),
            reason: "unknown tool".to_string(),
        }),
    }
}

/// Publishes the call's command and builds the acknowledgement the model waits for.
pub fn execute(bus: &CommandBus, call: &FunctionCall) -> FunctionResponse {
    let outcome = match command_for(call) {
        Ok(command) => {
            tracing::info!("tool call {} -> {:?}", call.name, command);
            let delivery = bus.publish(&command);
            if delivery.is_success() {
                ToolOutcome::Success
            } else {
                let err = AgentError::ToolExecution {
                    tool: call.name.clone(),
                    reason: format!("{} of {} handlers failed", delivery.failed, delivery.delivered),
                };
                tracing::warn!("{}", err);
                ToolOutcome::Failed
            }
        }
        Err(e) => {
            tracing::warn!("{}", e);
            ToolOutcome::Failed
        }
    };
    FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response: ToolResult { result: outcome },
    }
}
