#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = marks_engine::run().await {
        eprintln!("marks-engine fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
