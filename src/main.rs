//! mp3cast - PCM/WAV to MP3 from the command line
//!
//! Commands:
//! - `convert`: whole-file conversion with live progress
//! - `stream`: feeds a file through the streaming session chunk by chunk
//! - `record`: encodes raw PCM arriving on stdin
//! - `info`: frame count, duration and tags of an MP3
//! - `config`: show or write the default settings

use clap::{Args, Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use mp3cast::config::Config;
use mp3cast::convert::DEFAULT_CHUNK_FRAMES;
use mp3cast::session::FLUSH_BUFFER_LEN;
use mp3cast::{
    pcm, probe, tags, wav, ConvertEvent, ConvertJob, EncoderConfig, Id3Tags, InputFormat, Mp3Recorder, Mp3Session,
};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "mp3cast", version, about = "Encode PCM and WAV audio to MP3 with LAME")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the LAME version
    Version,
    /// Convert a PCM or WAV file to MP3
    Convert {
        input: PathBuf,
        output: PathBuf,
        /// Treat input as WAV (skip the 44-byte header)
        #[arg(long, conflicts_with = "pcm")]
        wav: bool,
        /// Treat input as headerless PCM
        #[arg(long)]
        pcm: bool,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Encode a raw PCM file through the streaming session
    Stream {
        input: PathBuf,
        output: PathBuf,
        /// Frames per encode call
        #[arg(long, default_value_t = 1152)]
        frames: usize,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Encode raw little-endian PCM read from stdin
    Record {
        output: PathBuf,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Show frame count, duration and tags of an MP3 file
    Info { input: PathBuf },
    /// Show or write the default settings
    Config {
        /// Write the current settings to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct EncodeArgs {
    /// Input sample rate in Hz
    #[arg(long)]
    rate: Option<u32>,
    /// Input channel count (1 or 2)
    #[arg(long)]
    channels: Option<u16>,
    /// Output sample rate in Hz
    #[arg(long)]
    out_rate: Option<u32>,
    /// LAME quality, 0 (best) to 9 (fastest)
    #[arg(long)]
    quality: Option<u8>,
    /// Constant bitrate in kbps instead of VBR
    #[arg(long)]
    cbr: Option<u32>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    artist: Option<String>,
    #[arg(long)]
    album: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    comment: Option<String>,
}

impl EncodeArgs {
    /// Merge flags over config defaults; `detected` comes from a WAV header
    fn encoder_config(&self, config: &Config, detected: Option<wav::WavFormat>) -> EncoderConfig {
        let rate = self.rate.or(detected.map(|f| f.sample_rate)).unwrap_or(44100);
        let channels = self.channels.or(detected.map(|f| f.channels)).unwrap_or(2);
        let out_rate = self.out_rate.or(config.output_sample_rate).unwrap_or(rate);
        let bitrate = match self.cbr {
            Some(kbps) => mp3cast::BitrateMode::Cbr(kbps),
            None => config.bitrate(),
        };

        EncoderConfig::new(rate, channels, out_rate)
            .with_quality(self.quality.unwrap_or(config.quality))
            .with_bitrate(bitrate)
            .with_tags(self.tags(config))
    }

    fn tags(&self, config: &Config) -> Option<Id3Tags> {
        let mut tags = config.tags.clone().unwrap_or_default();
        let overrides = [
            (&self.title, &mut tags.title),
            (&self.artist, &mut tags.artist),
            (&self.album, &mut tags.album),
            (&self.year, &mut tags.year),
            (&self.comment, &mut tags.comment),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        (!tags.is_empty()).then_some(tags)
    }
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(Some(env_logger::TimestampPrecision::Seconds))
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    if let Err(e) = run(cli.command, config) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Command, config: Config) -> AppResult<()> {
    match command {
        Command::Version => {
            println!("mp3cast {} (LAME {})", env!("CARGO_PKG_VERSION"), mp3cast::encoder_version());
            Ok(())
        }
        Command::Convert {
            input,
            output,
            wav,
            pcm,
            encode,
        } => {
            let is_wav = wav || (!pcm && has_wav_extension(&input));
            convert(input, output, is_wav, &encode, &config)
        }
        Command::Stream {
            input,
            output,
            frames,
            encode,
        } => stream(&input, &output, frames, &encode, &config),
        Command::Record { output, encode } => record(&output, &encode, &config),
        Command::Info { input } => info(&input),
        Command::Config { save } => {
            if save {
                config.save()?;
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = Config::config_path() {
                println!("# {}", path.display());
            }
            Ok(())
        }
    }
}

fn has_wav_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("wav"))
}

/// Run the conversion on a worker thread and print its progress here
fn convert(input: PathBuf, output: PathBuf, is_wav: bool, args: &EncodeArgs, config: &Config) -> AppResult<()> {
    let detected = if is_wav { Some(wav::read_format(&input)?) } else { None };
    let job = ConvertJob::new(input, output, args.encoder_config(config, detected))
        .with_format(if is_wav { InputFormat::Wav } else { InputFormat::Pcm })
        .with_chunk_frames(config.chunk_frames.max(1));

    let (tx, rx) = crossbeam_channel::bounded::<ConvertEvent>(64);
    let worker = thread::spawn(move || {
        let mut tx = tx;
        mp3cast::convert_file(&job, &mut tx)
    });

    for event in rx.iter() {
        match event {
            ConvertEvent::Progress(percent) => {
                print!("\r{:5.1}%", percent);
                io::stdout().flush()?;
            }
            ConvertEvent::Finished => println!("\rdone   "),
        }
    }

    let summary = worker.join().map_err(|_| "conversion thread panicked")??;
    println!(
        "{} frames -> {} MP3 bytes ({} input bytes)",
        summary.frames, summary.mp3_bytes, summary.input_bytes
    );
    Ok(())
}

/// Drive a session by hand: encode planes, flush, finalize, append the tail
fn stream(input: &Path, output: &Path, frames: usize, args: &EncodeArgs, config: &Config) -> AppResult<()> {
    let encoder = args.encoder_config(config, None);
    let channels = encoder.channels as usize;
    let frames = frames.max(1);

    let mut session: Mp3Session = Mp3Session::new();
    session.initialize(encoder)?;

    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    let mut bytes = vec![0u8; frames * channels * pcm::BYTES_PER_SAMPLE];
    let mut samples = Vec::with_capacity(frames * channels);
    let (mut left, mut right) = (Vec::new(), Vec::new());
    let mut out = vec![0u8; session.output_capacity(frames).max(FLUSH_BUFFER_LEN)];
    let mut total = 0u64;

    loop {
        let read = read_full(&mut reader, &mut bytes)?;
        if read == 0 {
            break;
        }
        samples.clear();
        pcm::decode_le(&bytes[..read], &mut samples);
        pcm::split_channels(&samples, channels as u16, &mut left, &mut right);

        let written = session.encode(&left, &right, left.len(), &mut out)?;
        writer.write_all(&out[..written])?;
        total += written as u64;
    }
    writer.flush()?;
    drop(writer);

    let flushed = session.flush(&mut out, output)?;
    OpenOptions::new().append(true).open(output)?.write_all(&out[..flushed])?;
    total += flushed as u64;
    session.close();

    println!("{} MP3 bytes, {} ms", total, session_duration(output)?);
    Ok(())
}

/// Encode stdin until it closes
fn record(output: &Path, args: &EncodeArgs, config: &Config) -> AppResult<()> {
    let mut recorder: Mp3Recorder = Mp3Recorder::create(output, args.encoder_config(config, None))?;
    let mut stdin = io::stdin().lock();
    let mut buf = vec![0u8; DEFAULT_CHUNK_FRAMES * 4];

    loop {
        let read = match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        recorder.write_pcm(&buf[..read])?;
    }

    let total = recorder.finish()?;
    println!("{} MP3 bytes written to {}", total, output.display());
    Ok(())
}

fn info(input: &Path) -> AppResult<()> {
    let data = std::fs::read(input)?;
    let info = probe::probe_bytes(&data);

    println!("frames:      {}", info.frames);
    println!("sample rate: {} Hz", info.sample_rate);
    println!("channels:    {}", if info.mono { "mono" } else { "stereo" });
    println!("duration:    {:.3} s", info.duration.as_secs_f64());
    println!("vbr tag:     {}", if info.tag_frame { "yes" } else { "no" });
    if info.tag_len > 0 {
        for (id, label) in [
            (b"TIT2", "title"),
            (b"TPE1", "artist"),
            (b"TALB", "album"),
            (b"TYER", "year"),
            (b"TDRC", "year"),
            (b"TSSE", "encoder"),
        ] {
            if let Some(value) = tags::read_text_frame(&data, id) {
                println!("{:<12} {}", format!("{}:", label), value);
            }
        }
    }
    Ok(())
}

fn session_duration(path: &Path) -> AppResult<u128> {
    Ok(probe::probe_file(path)?.duration.as_millis())
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
