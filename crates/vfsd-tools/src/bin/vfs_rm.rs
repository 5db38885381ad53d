//! `vfs-rm <uri>` — delete a file or directory.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::MountProxy;

#[derive(Parser)]
#[command(about = "Delete a vfsd-mounted file")]
struct Args {
    uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-rm: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let connection = vfsd_tools::connect().await?;
    let target = vfsd_tools::resolve(&connection, &args.uri).await?;
    let mount = MountProxy::builder(&connection)
        .path(target.object_path.as_str())?
        .build()
        .await?;
    mount.delete(target.path).await?;
    Ok(())
}
