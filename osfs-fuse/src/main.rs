mod block_file;
mod clock;
mod logger;

use block_file::BlockFile;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use clock::SystemClock;
use log::{error, info, warn};
use osfs::{open_file, FsError, OpenFlags, Volume, VolumeConfig, BLOCK_SZ};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn fs_err(err: FsError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn cli() -> App<'static, 'static> {
    App::new("osfs-fuse")
        .version("0.1.0")
        .about("Build and inspect osfs volume images")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Raise the log level (-v info, -vv debug, -vvv trace)"),
        )
        .subcommand(
            SubCommand::with_name("pack")
                .about("Pack the regular files of a directory into a new image")
                .arg(
                    Arg::with_name("source")
                        .short("s")
                        .long("source")
                        .takes_value(true)
                        .required(true)
                        .help("Directory whose files are packed"),
                )
                .arg(image_arg())
                .arg(
                    Arg::with_name("inodes")
                        .long("inodes")
                        .takes_value(true)
                        .help("Number of inodes, root included"),
                )
                .arg(
                    Arg::with_name("blocks")
                        .long("blocks")
                        .takes_value(true)
                        .help("Number of data blocks"),
                ),
        )
        .subcommand(
            SubCommand::with_name("ls")
                .about("List the files of an image")
                .arg(image_arg()),
        )
        .subcommand(
            SubCommand::with_name("cat")
                .about("Write one file of an image to stdout")
                .arg(image_arg())
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .takes_value(true)
                        .required(true),
                ),
        )
}

fn image_arg() -> Arg<'static, 'static> {
    Arg::with_name("image")
        .short("i")
        .long("image")
        .takes_value(true)
        .required(true)
        .help("Path of the volume image")
}

fn parse_count(matches: &ArgMatches, name: &str, default: u32) -> io::Result<u32> {
    match matches.value_of(name) {
        Some(value) => value.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("--{} expects a number, got {:?}", name, value),
            )
        }),
        None => Ok(default),
    }
}

fn volume_config(matches: &ArgMatches) -> io::Result<VolumeConfig> {
    let defaults = VolumeConfig::default();
    let config = VolumeConfig::new(
        parse_count(matches, "inodes", defaults.inode_count)?,
        parse_count(matches, "blocks", defaults.data_blocks)?,
    );
    config.validate().map_err(fs_err)?;
    Ok(config)
}

/// Format a fresh volume, copy every regular file of `source` into its root
/// directory and write the image. Returns how many files were packed.
fn pack(source: &Path, image: &Path, config: &VolumeConfig) -> io::Result<usize> {
    let volume = Volume::format(config, Arc::new(SystemClock)).map_err(fs_err)?;
    let root = Volume::root_inode(&volume);

    let mut entries = fs::read_dir(source)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    let mut packed = 0;
    for entry in entries {
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("skipping {:?}: name is not UTF-8", raw);
                continue;
            }
        };
        let data = fs::read(entry.path())?;
        let file = match open_file(&root, &name, OpenFlags::CREATE | OpenFlags::WRONLY) {
            Ok(file) => file,
            Err(FsError::NameTooLong) => {
                warn!("skipping {}: name too long", name);
                continue;
            }
            Err(err) => return Err(fs_err(err)),
        };
        let written = file.write(&data[..]).map_err(fs_err)?;
        if written < data.len() {
            warn!(
                "{}: only {} of {} bytes fit in one block",
                name,
                written,
                data.len()
            );
        }
        info!("packed {} ({} bytes)", name, written);
        packed += 1;
    }

    let image_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    image_file.set_len(volume.lock().config().total_blocks() as u64 * BLOCK_SZ as u64)?;
    let device = BlockFile(Mutex::new(image_file));
    volume.lock().sync(&device).map_err(fs_err)?;
    Ok(packed)
}

fn open_image(image: &Path) -> io::Result<Arc<spin::Mutex<Volume>>> {
    let file = OpenOptions::new().read(true).write(true).open(image)?;
    let device = BlockFile(Mutex::new(file));
    Volume::open(&device, Arc::new(SystemClock)).map_err(fs_err)
}

/// Names and sizes of the files in the root directory.
fn list(image: &Path) -> io::Result<Vec<(String, usize)>> {
    let volume = open_image(image)?;
    let root = Volume::root_inode(&volume);
    let mut listing = Vec::new();
    for name in root.ls().map_err(fs_err)? {
        let inode = root
            .find(&name)
            .map_err(fs_err)?
            .ok_or_else(|| fs_err(FsError::NotFound))?;
        listing.push((name, inode.size().map_err(fs_err)?));
    }
    Ok(listing)
}

fn cat(image: &Path, name: &str, out: &mut dyn Write) -> io::Result<usize> {
    let volume = open_image(image)?;
    let root = Volume::root_inode(&volume);
    let file = open_file(&root, name, OpenFlags::RDONLY).map_err(fs_err)?;
    let mut buf = [0u8; 512];
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[..]).map_err(fs_err)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        total += n;
    }
    Ok(total)
}

fn run(matches: &ArgMatches) -> io::Result<()> {
    match matches.subcommand() {
        ("pack", Some(sub)) => {
            let config = volume_config(sub)?;
            let source = Path::new(sub.value_of("source").unwrap_or("."));
            let image = Path::new(sub.value_of("image").unwrap_or("fs.img"));
            let packed = pack(source, image, &config)?;
            println!(
                "packed {} files into {} ({} blocks)",
                packed,
                image.display(),
                config.total_blocks()
            );
        }
        ("ls", Some(sub)) => {
            let image = Path::new(sub.value_of("image").unwrap_or("fs.img"));
            for (name, size) in list(image)? {
                println!("{:>6} {}", size, name);
            }
        }
        ("cat", Some(sub)) => {
            let image = Path::new(sub.value_of("image").unwrap_or("fs.img"));
            let name = sub.value_of("name").unwrap_or_default();
            let stdout = io::stdout();
            let mut out = stdout.lock();
            cat(image, name, &mut out)?;
            out.flush()?;
        }
        _ => {}
    }
    Ok(())
}

fn main() {
    let matches = cli().get_matches();
    logger::init(matches.occurrences_of("verbose"));
    if let Err(err) = run(&matches) {
        error!("{}", err);
        std::process::exit(1);
    }
}
