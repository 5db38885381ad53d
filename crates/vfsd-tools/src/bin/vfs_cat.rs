//! `vfs-cat <uri>` — stream a remote file to stdout.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::MountProxy;

#[derive(Parser)]
#[command(about = "Print a vfsd-mounted file to stdout")]
struct Args {
    uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-cat: {err}");
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
    let socket_path = mount
        .open_for_read(
            target.path,
            vfsd_tools::connection_id(),
            vfsd_tools::next_serial(),
        )
        .await?;
    let mut stdout = tokio::io::stdout();
    vfsd_tools::drain_channel_to(&socket_path, &mut stdout).await?;
    Ok(())
}
