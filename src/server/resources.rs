use super::protocol::{JsonRpcError, Resource, ResourceContents};
use crate::ledger::Ledger;

pub const DOWNLOADS_URI: &str = "downloads://list";
const JSON_MIME: &str = "application/json";

pub fn definitions() -> Vec<Resource> {
    vec![Resource {
        uri: DOWNLOADS_URI,
        name: "Downloaded Files",
        description: "List of all downloaded files' absolute paths",
        mime_type: JSON_MIME,
    }]
}

pub fn read(ledger: &Ledger, uri: &str) -> Result<Vec<ResourceContents>, JsonRpcError> {
    if uri != DOWNLOADS_URI {
        return Err(JsonRpcError::invalid_params(format!("unknown resource: {uri}")));
    }

    let text = serde_json::to_string(&ledger.list()).map_err(JsonRpcError::internal)?;

    Ok(vec![ResourceContents {
        uri: DOWNLOADS_URI.to_string(),
        mime_type: JSON_MIME.to_string(),
        text,
    }])
}
