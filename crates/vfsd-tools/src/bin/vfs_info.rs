//! `vfs-info <uri>` — print a file's info record.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::MountProxy;

#[derive(Parser)]
#[command(about = "Print metadata for a vfsd-mounted file")]
struct Args {
    uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-info: {err}");
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
    let (name, is_dir, size) = mount.get_info(target.path).await?;
    println!("name: {name}");
    println!("type: {}", if is_dir { "directory" } else { "file" });
    println!("size: {size}");
    Ok(())
}
