//! Print the webhook OpenAPI document, or write it to the path given as first argument.

use anyhow::Context;
use golare_back::services::documentation::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("serializing the OpenAPI document")?;
    match std::env::args().nth(1) {
        Some(path) => std::fs::write(&path, json).with_context(|| format!("writing {path}"))?,
        None => println!("{json}"),
    }
    Ok(())
}
