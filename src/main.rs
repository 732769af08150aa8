#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = coding_assessment::run().await {
        eprintln!("coding-assessment fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
