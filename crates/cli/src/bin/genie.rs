use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    genie_cli::main_entry().await
}
