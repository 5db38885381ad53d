//! `vfs-ls <uri>` — enumerate a directory and print a table.

use clap::Parser;
use std::process::ExitCode;
use vfsd_tools::proxy::MountProxy;

#[derive(Parser)]
#[command(about = "List the contents of a vfsd-mounted directory")]
struct Args {
    uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("vfs-ls: {err}");
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
    let entries = mount.enumerate(target.path).await?;
    for (name, is_dir) in entries {
        println!("{}{}", name, if is_dir { "/" } else { "" });
    }
    Ok(())
}
