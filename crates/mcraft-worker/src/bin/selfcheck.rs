//! Environment self-check: directories and the FFmpeg toolchain.

use std::path::Path;
use std::process::Command;

use mcraft_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "selfcheck: starting with data_dir={} work_dir={}",
        config.data_dir.display(),
        config.work_dir.display()
    );

    ensure_dir(&config.data_dir).await?;
    ensure_dir(&config.results_dir).await?;
    ensure_dir(&config.work_dir).await?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;

    println!("selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_tool(tool: &str) -> anyhow::Result<()> {
    let output = Command::new(tool)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", tool, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            tool,
            output.status
        ));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    if let Some(first_line) = version.lines().next() {
        println!("selfcheck: {}", first_line);
    }
    Ok(())
}
