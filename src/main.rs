use clap::{Parser, Subcommand};
use gavf::packet::PacketFlags;
use gavf::{GavfReader, GavfWriter, Options, ProgramHeader, Seekable};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gavf", about = "Inspect, dump and remux GAVF files")]
struct Cli {
    /// Debug logging (otherwise RUST_LOG, default "warn")
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON file with mux/demux options
    #[arg(long, global = true)]
    options: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show streams, formats, stats and index sizes
    Info {
        input: PathBuf,
    },
    /// Print one line per packet
    Dump {
        input: PathBuf,
        /// Stream ids to leave out
        #[arg(long)]
        skip: Vec<u32>,
        /// Show PTS as stored, without normalization
        #[arg(long)]
        raw_pts: bool,
    },
    /// Copy selected streams into a new file
    Remux {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Stream ids to drop
        #[arg(long)]
        skip: Vec<u32>,
        /// Sync header spacing in milliseconds
        #[arg(long)]
        sync_distance: Option<i64>,
        /// Also write a packet index
        #[arg(long)]
        packet_index: bool,
    },
    /// Rebuild the indices from the packet region
    Scan {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let base = load_options(cli.options.as_deref())?;

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let rd = open_reader(&input, base)?;
            let header = rd.header();

            println!("── GAVF file ────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Streams        {}", header.num_streams());
            if let Some((start, end)) = header.duration() {
                println!("  Duration       {:.3} s (start {:.3} s)", (end - start) as f64 / 1e6, start as f64 / 1e6);
            }
            println!("  Sync points    {}", rd.sync_index().map_or(0, |i| i.len()));
            println!("  Packet index   {}", rd.packet_index().map_or(0, |i| i.len()));
            for (name, value) in header.metadata.iter() {
                println!("  {name:<14} {value:?}");
            }
            println!();
            print!("{}", header.describe());
            for s in &header.streams {
                if s.stats.is_defined() {
                    println!(
                        "  stream {}: {} packets, {} B, size {}..{}",
                        s.id,
                        s.stats.total_packets,
                        s.stats.total_bytes,
                        s.stats.size_min.unwrap_or(0),
                        s.stats.size_max.unwrap_or(0)
                    );
                }
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, skip, raw_pts } => {
            let opts = Options { pts_normalization: !raw_pts, ..base };
            let mut rd = open_reader(&input, opts)?;
            for id in skip {
                rd.set_skip(id, true)?;
            }
            println!("{:>6} {:>14} {:>10} {:>5} {:>9} {:>8}  Data", "Stream", "PTS", "Duration", "Flags", "Size", "CRC32");
            while let Some(pkt) = rd.read_packet()? {
                let prefix = &pkt.data[..pkt.data.len().min(8)];
                println!(
                    "{:>6} {:>14} {:>10} {:>5} {:>9} {:08x}  {}",
                    pkt.stream_id,
                    pkt.pts,
                    pkt.duration,
                    flag_str(pkt.flags),
                    pkt.data.len(),
                    crc32fast::hash(&pkt.data),
                    hex::encode(prefix)
                );
            }
            println!("end: {:?}", rd.end_reason());
        }

        // ── Remux ────────────────────────────────────────────────────────────
        Commands::Remux { input, output, skip, sync_distance, packet_index } => {
            let read_opts = Options { pts_normalization: false, ..base.clone() };
            let mut rd = open_reader(&input, read_opts)?;

            let mut header = ProgramHeader::new();
            header.metadata = rd.header().metadata.clone();
            let mut ids: HashMap<u32, u32> = HashMap::new();
            for s in &rd.header().streams {
                if skip.contains(&s.id) {
                    continue;
                }
                ids.insert(s.id, header.add_stream(s));
            }
            for id in &skip {
                rd.set_skip(*id, true)?;
            }

            let mut opts = Options { packet_index, ..base };
            if let Some(ms) = sync_distance {
                opts.sync_distance = ms * 1000;
            }
            let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&output)?;
            let mut wr = GavfWriter::new(Seekable(file), header, opts)?;
            let mut copied = 0u64;
            while let Some(pkt) = rd.read_packet()? {
                if let Some(&id) = ids.get(&pkt.stream_id) {
                    wr.put_packet(id, pkt)?;
                    copied += 1;
                }
            }
            wr.finish()?;
            println!("Remuxed {copied} packet(s) → {}", output.display());
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input } => {
            let mut rd = open_reader(&input, base)?;
            let report = rd.rebuild_index()?;
            println!("Scan: {}", report.summary());
            for (s, count) in rd.header().streams.iter().zip(&report.stream_packets) {
                println!("  stream {}  packets={}", s.id, count);
            }
            match rd.sync_index() {
                Some(stored) if *stored == report.sync_index => println!("Stored sync index matches."),
                Some(_) => println!("Stored sync index differs from the scan."),
                None => println!("No stored sync index."),
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("gavf=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_options(path: Option<&Path>) -> Result<Options, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(Options::from_json(&std::fs::read_to_string(p)?)?),
        None    => Ok(Options::default()),
    }
}

fn open_reader(path: &Path, opts: Options) -> Result<GavfReader<Seekable<File>>, Box<dyn std::error::Error>> {
    let file = OpenOptions::new().read(true).open(path)?;
    Ok(GavfReader::open(Seekable(file), opts)?)
}

fn flag_str(flags: PacketFlags) -> String {
    let kind = match flags.0 & PacketFlags::TYPE_MASK {
        PacketFlags::TYPE_I => 'I',
        PacketFlags::TYPE_P => 'P',
        PacketFlags::TYPE_B => 'B',
        _ => '-',
    };
    let key = if flags.is_keyframe() { 'K' } else { '-' };
    let field = if flags.has_field2() { 'F' } else { '-' };
    format!("{kind}{key}{field}")
}
