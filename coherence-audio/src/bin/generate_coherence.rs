use std::env;
use std::fs::File;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use coherence_audio::acquisition::SegmentAcquirer;
use coherence_audio::config::CoherenceConfig;
use coherence_audio::error::CoherenceError;
use coherence_audio::mp3::Mp3Decoder;
use coherence_audio::raw_stream::{read_block, RawStream};
use coherence_audio::shared_data::{CoherenceResults, PerChannelSegments};
use coherence_audio::Session;
use coherence_sync::SharedBuffer;

// Frames handed to the acquirer per call, roughly one audio callback's worth.
const BLOCK_FRAMES: usize = 512;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

fn eprint_usage_and_exit() -> ! {
    let program_name = env::args()
        .next()
        .unwrap_or_else(|| "generate_coherence".to_string());
    eprintln!("usage: {} <config_path> <audio_path>", program_name);
    process::exit(1);
}

fn get_arg(args: &mut env::Args, err_msg: &'static str) -> Result<String, String> {
    match args.next() {
        Some(arg) => Ok(arg),
        None => Err(err_msg.to_string()),
    }
}

fn open_file(path: &str) -> Result<File, String> {
    match File::open(&path) {
        Ok(reader) => Ok(reader),
        Err(e) => Err(format!("could not open {}: {}", path, e)),
    }
}

struct Args {
    config_path: String,
    audio_path: String,
}

impl Args {
    fn from_env_args() -> Result<Self, String> {
        let mut args = env::args();
        args.next(); // program name

        let config_path = get_arg(&mut args, "missing config_path")?;
        let audio_path = get_arg(&mut args, "missing audio_path")?;

        Ok(Self {
            config_path,
            audio_path,
        })
    }
}

fn init() -> Result<(Mp3Decoder<File>, CoherenceConfig), String> {
    let args = Args::from_env_args()?;

    let audio_reader = open_file(&args.audio_path)?;
    let decoder = match Mp3Decoder::new(audio_reader) {
        Ok(decoder) => Ok(decoder),
        Err(e) => Err(format!("{}", e)),
    }?;

    let config_reader = open_file(&args.config_path)?;
    let mut config = match CoherenceConfig::from_yaml_reader(config_reader) {
        Ok(config) => Ok(config),
        Err(e) => Err(format!("{}", e)),
    }?;

    let decoder_rate = decoder.sample_rate() as f64;
    if config.sample_rate != decoder_rate {
        warn!(
            "config sample_rate {} overridden by the stream's {}",
            config.sample_rate, decoder_rate
        );
        config.sample_rate = decoder_rate;
    }
    if let Some(&channel) = config.mode.channels().iter().max() {
        if channel >= decoder.channels() {
            return Err(format!(
                "channel {} requested but the stream only has {}",
                channel,
                decoder.channels()
            ));
        }
    }
    info!("{:?}", config);

    Ok((decoder, config))
}

fn acquire(
    mut decoder: Mp3Decoder<File>,
    mut acquirer: SegmentAcquirer,
    data: Arc<SharedBuffer<PerChannelSegments>>,
) -> Result<usize, CoherenceError> {
    let mut writer = data.with_write_access()?;
    let mut block = vec![vec![0.0; BLOCK_FRAMES]; decoder.channels()];
    let mut committed = 0;
    loop {
        let frames = read_block(&mut decoder, &mut block);
        let slices: Vec<&[f32]> = block.iter().map(|channel| &channel[..frames]).collect();
        committed += acquirer.process_block(&mut writer, &slices);
        if frames < BLOCK_FRAMES {
            return Ok(committed);
        }
    }
}

// Waits until the analysis thread has published results for the last segment.
fn drain(results: &SharedBuffer<CoherenceResults>, last_trial: u64) -> Result<(), CoherenceError> {
    let mut reader = results.with_read_access()?;
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        reader.refresh();
        if reader.get().map_or(false, |r| r.trial >= last_trial) {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err(CoherenceError::Thread("analysis did not catch up in time"));
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn print_results(results: &SharedBuffer<CoherenceResults>) -> Result<(), CoherenceError> {
    let reader = results.with_read_access()?;
    let latest = match reader.get() {
        Some(latest) => latest,
        None => {
            eprintln!("no complete segment in the stream");
            return Ok(());
        }
    };

    println!("# {:?} after trial {}", latest.kind, latest.trial);
    for (f, freq) in latest.frequencies.iter().enumerate() {
        let row: Vec<String> = latest.rows.iter().map(|r| r[f].to_string()).collect();
        println!("{},{}", freq, row.join(","));
    }
    Ok(())
}

fn run(decoder: Mp3Decoder<File>, config: CoherenceConfig) -> Result<(), CoherenceError> {
    let mut session = Session::new(config)?;
    session.start()?;

    let acquirer = session.acquirer();
    let data = session.data();
    let acquisition = thread::Builder::new()
        .name("coherence-acquisition".to_string())
        .spawn(move || acquire(decoder, acquirer, data))?;
    let committed = match acquisition.join() {
        Ok(committed) => committed?,
        Err(_) => return Err(CoherenceError::Thread("acquisition thread panicked")),
    };

    let diagnostics = session.diagnostics();
    info!(
        "{} segments committed, {} discarded",
        committed,
        diagnostics.discarded()
    );
    if committed > 0 {
        drain(&session.results(), diagnostics.trials())?;
    }
    session.stop()?;
    print_results(&session.results())
}

fn main() {
    #[cfg(debug_assertions)]
    env_logger::init();

    let (decoder, config) = match init() {
        Ok((decoder, config)) => (decoder, config),
        Err(e) => {
            eprintln!("{}", e);
            eprint_usage_and_exit();
        }
    };

    if let Err(e) = run(decoder, config) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
