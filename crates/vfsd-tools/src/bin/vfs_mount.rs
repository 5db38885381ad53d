//! `vfs-mount <uri>` — mount a backend, printing its assigned object path.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::DaemonProxy;

#[derive(Parser)]
#[command(about = "Mount a backend from a scheme://host URI")]
struct Args {
    uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-mount: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let connection = vfsd_tools::connect().await?;
    let daemon = DaemonProxy::new(&connection).await?;
    let object_path = daemon.mount(args.uri).await?;
    println!("{object_path}");
    Ok(())
}
