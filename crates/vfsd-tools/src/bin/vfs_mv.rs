//! `vfs-mv <src> <dst>` — move within a backend, or copy+delete across
//! backends.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::MountProxy;

#[derive(Parser)]
#[command(about = "Move or rename a vfsd-mounted file")]
struct Args {
    src: String,
    dst: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-mv: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let connection = vfsd_tools::connect().await?;

    let src = vfsd_tools::resolve(&connection, &args.src).await?;
    let dst = vfsd_tools::resolve(&connection, &args.dst).await?;

    if src.object_path == dst.object_path {
        let mount = MountProxy::builder(&connection)
            .path(src.object_path.as_str())?
            .build()
            .await?;
        mount.move_path(src.path, dst.path).await?;
        return Ok(());
    }

    let src_mount = MountProxy::builder(&connection)
        .path(src.object_path.as_str())?
        .build()
        .await?;
    let src_socket = src_mount
        .open_for_read(
            src.path.clone(),
            vfsd_tools::connection_id(),
            vfsd_tools::next_serial(),
        )
        .await?;
    let mut buffer = Vec::new();
    vfsd_tools::drain_channel_to(&src_socket, &mut buffer).await?;

    let dst_mount = MountProxy::builder(&connection)
        .path(dst.object_path.as_str())?
        .build()
        .await?;
    let dst_socket = dst_mount
        .open_for_write(
            dst.path,
            false,
            vfsd_tools::connection_id(),
            vfsd_tools::next_serial(),
        )
        .await?;
    let mut cursor = std::io::Cursor::new(buffer);
    vfsd_tools::pump_channel_from(&dst_socket, &mut cursor).await?;

    src_mount.delete(src.path).await?;
    Ok(())
}
