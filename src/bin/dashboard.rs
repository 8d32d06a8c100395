use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dashboard")]
struct Args {
    /// Path to the step tracker data directory
    #[arg(long, default_value = "step_tracker_data")]
    data_dir: PathBuf,

    /// Port to serve on
    #[arg(long, default_value = "8081")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.data_dir.exists() {
        eprintln!("Warning: Data directory {:?} does not exist", args.data_dir);
    }
    println!("Watching directory: {:?}", args.data_dir);

    step_tracker_rs::dashboard::serve(args.data_dir, args.port).await?;
    Ok(())
}
