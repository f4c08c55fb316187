use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    chglg::cli::run().await
}
