use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use fuser::MountOption;
use log::{error, info};

use pinafs::device::FileBlockDevice;
use pinafs::filesystem::Filesystem;
use pinafs::fuse_adapter::FuseAdapter;

/// Mount a small POSIX-style filesystem image via FUSE.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the backing image file.
    image: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Format `image` as a fresh filesystem before mounting.
    #[arg(short, long)]
    init: bool,

    /// Size in megabytes for a freshly created image (only with --init).
    #[arg(long, default_value_t = 64)]
    size_mb: u64,

    #[command(flatten)]
    verbosity: Verbosity<clap_verbosity_flag::InfoLevel>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbosity.log_level_filter())
        .init();

    let device = if args.init {
        info!("formatting {} ({} MiB)", args.image.display(), args.size_mb);
        match FileBlockDevice::create(&args.image, args.size_mb * 1024 * 1024) {
            Ok(d) => d,
            Err(e) => {
                error!("failed to create image: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match FileBlockDevice::open(&args.image) {
            Ok(d) => d,
            Err(e) => {
                error!("failed to open image: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    let fs = if args.init {
        Filesystem::format(device)
    } else {
        Filesystem::mount(device)
    };
    let fs = match fs {
        Ok(fs) => fs,
        Err(e) => {
            error!("failed to initialize filesystem: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = vec![
        MountOption::FSName("pinafs".to_string()),
        MountOption::AutoUnmount,
    ];

    info!("mounting {} at {}", args.image.display(), args.mountpoint.display());
    if let Err(e) = fuser::mount2(FuseAdapter::new(fs), &args.mountpoint, &options) {
        error!("mount failed: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
