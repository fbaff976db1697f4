use super::protocol::{
    Content, GetPromptResult, JsonRpcError, Prompt, PromptArgument, PromptMessage, Role,
};
use super::tools::DOWNLOAD_TOOL;
use serde_json::{Map, Value};

pub const DOWNLOAD_PROMPT: &str = "download_file_prompt";

pub fn definitions() -> Vec<Prompt> {
    vec![Prompt {
        name: DOWNLOAD_PROMPT,
        description: "Guide to download a file by URL to target directory with filename",
        arguments: vec![
            PromptArgument {
                name: "url",
                description: "The video/file URL (HTTP/HTTPS)",
                required: true,
            },
            PromptArgument {
                name: "save_dir",
                description: "Destination directory to save the file",
                required: true,
            },
            PromptArgument {
                name: "filename",
                description: "Target filename to use for saving",
                required: true,
            },
        ],
    }]
}

/// Renders a prompt. Has no side effects.
pub fn get(name: &str, arguments: &Map<String, Value>) -> Result<GetPromptResult, JsonRpcError> {
    if name != DOWNLOAD_PROMPT {
        return Err(JsonRpcError::invalid_params(format!("unknown prompt: {name}")));
    }

    let url = argument(arguments, "url")?;
    let save_dir = argument(arguments, "save_dir")?;
    let filename = argument(arguments, "filename")?;

    let text = format!(
        "Use tool '{DOWNLOAD_TOOL}' with arguments: url={url}, save_dir={save_dir}, filename={filename}. \
         This will download the file to the destination and return the absolute path."
    );

    Ok(GetPromptResult {
        description: "Download File Instruction".to_string(),
        messages: vec![PromptMessage {
            role: Role::Assistant,
            content: Content::text(text),
        }],
    })
}

fn argument(arguments: &Map<String, Value>, name: &str) -> Result<String, JsonRpcError> {
    match arguments.get(name) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(JsonRpcError::invalid_params(format!(
            "missing prompt argument: {name}"
        ))),
    }
}
