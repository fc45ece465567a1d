use std::{
    env,
    fs::File,
    io::{self, BufWriter, Read, Write},
    os::fd::AsRawFd,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_2048::{
    driver::{drive, RunStats},
    policy::RandomPolicy,
    simulator::instance_rng,
    EnvId, LocalEnvManager, LookupTable, Move, Simulator, Transition,
};
use rand_chacha::ChaCha8Rng;
use shm_2048::{ConsumerChannel, ShmEnvManager, Worker, WorkerChannel, WorkerPool};
use tracing::{debug, info, info_span, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod render;

use config::Config;

/// Random stream of the driving policy, past every instance id.
const POLICY_STREAM: u64 = EnvId::MAX as u64 + 1;

/// Transitions between checks for exited workers.
const RESTART_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Parser)]
#[command(name = "dqn-2048", version, about = "2048 environments for reinforcement learning")]
struct Cli {
    /// Log filter, overriding `logging.level`. `RUST_LOG` still takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Play a game in the terminal with the arrow keys.
    Play {
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Drive in-process environments with a random legal policy.
    Local {
        #[arg(long)]
        envs: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Create the shared memory channel, spawn one worker process per environment and drive them.
    Serve {
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        channel: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run one environment on an existing channel. Started by `serve`.
    Worker {
        #[arg(long)]
        id: EnvId,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Number of transitions to collect.
    #[arg(long, default_value_t = 100_000)]
    steps: u64,
    /// Write every transition to this file as JSON lines.
    #[arg(long)]
    dump: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        let (num_envs, seed, channel) = match &self.command {
            Command::Play { seed } => (None, seed, None),
            Command::Local { envs, seed, .. } => (*envs, seed, None),
            Command::Serve {
                workers,
                seed,
                channel,
                ..
            } => (*workers, seed, channel.as_ref()),
            Command::Worker { seed, channel, .. } => (None, seed, channel.as_ref()),
        };

        if let Some(num_envs) = num_envs {
            config.env.num_envs = num_envs;
        }

        if let Some(seed) = seed {
            config.env.seed = Some(*seed);
        }

        if let Some(channel) = channel {
            config.channel.name = channel.clone();
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init()
        .context("failed to install the tracing subscriber")
}

fn policy_rng(seed: Option<u64>) -> ChaCha8Rng {
    let mut rng = instance_rng(0, seed);
    rng.set_stream(POLICY_STREAM);
    rng
}

/// Writes each transition as one line of JSON.
struct TransitionDump {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TransitionDump {
    fn create(path: PathBuf) -> Result<Self> {
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    fn write(&mut self, transition: &Transition) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, transition)?;
        self.out.write_all(b"\n")
    }

    fn finish(mut self) -> Result<()> {
        self.out
            .flush()
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

fn print_stats(stats: &RunStats) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, stats)?;
    writeln!(stdout)?;

    Ok(())
}

fn play_interactive(
    out: &mut (impl AsRawFd + Write),
    input: &mut impl Read,
    simulator: &mut Simulator,
) -> Result<()> {
    // Pattern order of the arrow key escapes below.
    const ARROW_KEYS: [Move; 4] = [Move::Up, Move::Down, Move::Right, Move::Left];

    let input_searcher =
        aho_corasick::packed::Searcher::new([b"\x1b[A", b"\x1b[B", b"\x1b[C", b"\x1b[D"])
            .context("failed to build the arrow key searcher")?;

    let mut buf = [0u8; 128];
    let mut buf_len = 0;

    let _raw = render::RawTerminal::enable(&*out).context("failed to configure the terminal")?;
    render::draw_board(out, simulator.board(), simulator.score())?;

    while !simulator.is_terminated() {
        let read = input.read(&mut buf[buf_len..])?;
        if read == 0 {
            break;
        }
        buf_len += read;

        for key in input_searcher
            .find_iter(&buf[..buf_len])
            .map(|m| m.pattern().as_usize())
        {
            let mv = ARROW_KEYS[key];

            if !simulator.moves().contains(mv) {
                continue;
            }

            let (board, score) = (simulator.board(), simulator.score());
            let reward = simulator.make_move(mv)?;
            debug!(?mv, reward, "move");

            render::redraw_board(out, board, simulator.board(), score, simulator.score())?;
        }

        // Keep an escape sequence split across reads.
        buf_len = match &buf[..buf_len] {
            [.., 0x1b, b'['] => {
                buf[..2].copy_from_slice(b"\x1b[");
                2
            }
            [.., 0x1b] => {
                buf[0] = 0x1b;
                1
            }
            _ => 0,
        }
    }

    writeln!(out, "Game over, score {}", simulator.score())?;

    Ok(())
}

fn run_play(config: &Config) -> Result<()> {
    let mut simulator = Simulator::new(
        0,
        Arc::new(LookupTable::build()),
        instance_rng(0, config.env.seed),
        config.env.spawn,
        config.env.reward,
    )?;

    let mut stdout = io::stdout().lock();
    let mut stdin = io::stdin().lock();

    play_interactive(&mut stdout, &mut stdin, &mut simulator)
}

fn run_local(config: &Config, run: RunArgs) -> Result<()> {
    let mut manager =
        LocalEnvManager::new(&config.env).context("failed to create the environments")?;
    let mut policy = RandomPolicy::new(policy_rng(config.env.seed));
    let mut dump = run.dump.map(TransitionDump::create).transpose()?;

    let stats = drive(&mut manager, &mut policy, run.steps, |transition| {
        if let Some(dump) = &mut dump {
            dump.write(transition)?;
        }
        Ok(())
    })?;

    if let Some(dump) = dump {
        dump.finish()?;
    }

    print_stats(&stats)
}

fn run_serve(config: &Config, run: RunArgs) -> Result<()> {
    let workers = config.env.num_envs;
    let channel = ConsumerChannel::create(&config.channel.name, workers)
        .with_context(|| format!("failed to create channel {:?}", config.channel.name))?;

    let program = env::current_exe().context("failed to locate the current executable")?;
    let mut pool = WorkerPool::new(program, config.channel.name.clone());
    if let Some(seed) = config.env.seed {
        pool = pool.arg("--seed").arg(seed.to_string());
    }
    pool.spawn(workers).context("failed to spawn workers")?;

    channel
        .wait_attached(workers, config.channel.response_timeout())
        .context("workers did not attach")?;
    info!(workers, channel = channel.name(), "all workers attached");

    let mut manager = ShmEnvManager::new(channel, config.channel.clone(), config.env.auto_reset);
    let mut policy = RandomPolicy::new(policy_rng(config.env.seed));
    let mut dump = run.dump.map(TransitionDump::create).transpose()?;
    let mut seen = 0u64;

    let result = drive(&mut manager, &mut policy, run.steps, |transition| {
        if let Some(dump) = &mut dump {
            dump.write(transition)?;
        }

        seen += 1;
        if seen % RESTART_CHECK_INTERVAL == 0 {
            let restarted = pool.restart_dead()?;
            if restarted > 0 {
                warn!(restarted, "restarted exited workers");
            }
        }

        Ok(())
    });

    if let Err(err) = manager.shutdown() {
        warn!(%err, "failed to signal shutdown");
    }
    pool.kill_all();

    let stats = result?;
    if let Some(dump) = dump {
        dump.finish()?;
    }

    print_stats(&stats)
}

fn run_worker(config: &Config, id: EnvId) -> Result<()> {
    let _span = info_span!("worker", id).entered();

    let channel = WorkerChannel::attach(&config.channel.name, id)
        .with_context(|| format!("failed to attach to channel {:?}", config.channel.name))?;
    let table = Arc::new(LookupTable::build());
    let mut worker = Worker::new(channel, &config.env, table, config.channel.action_timeout())?;

    let stats = worker.run()?;
    info!(?stats, "worker finished");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = Config::load()?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging.level)?;

    match &source {
        Some(path) => debug!(path = %path.display(), "loaded config"),
        None => debug!("no config file, using defaults"),
    }

    match cli.command {
        Command::Play { .. } => run_play(&config),
        Command::Local { run, .. } => run_local(&config, run),
        Command::Serve { run, .. } => run_serve(&config, run),
        Command::Worker { id, .. } => run_worker(&config, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from([
            "dqn-2048",
            "serve",
            "--workers",
            "3",
            "--seed",
            "9",
            "--channel",
            "cli-channel",
            "--log-level",
            "debug",
        ]);
        let mut config = Config::default();

        cli.apply(&mut config);

        assert_eq!(config.env.num_envs, 3);
        assert_eq!(config.env.seed, Some(9));
        assert_eq!(config.channel.name, "cli-channel");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unset_flags_keep_config_values() {
        let cli = Cli::parse_from(["dqn-2048", "local", "--steps", "10"]);
        let mut config = Config::default();
        config.env.seed = Some(4);

        cli.apply(&mut config);

        assert_eq!(config, Config {
            env: env_2048::EnvConfig {
                seed: Some(4),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(cli.command, Command::Local { run: RunArgs { steps: 10, dump: None }, .. }));
    }

    #[test]
    fn worker_requires_an_id() {
        assert!(Cli::try_parse_from(["dqn-2048", "worker"]).is_err());

        let cli = Cli::try_parse_from(["dqn-2048", "worker", "--id", "7"]).unwrap();
        assert!(matches!(cli.command, Command::Worker { id: 7, .. }));
    }

    #[test]
    fn dumps_one_json_line_per_transition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let config = Config {
            env: env_2048::EnvConfig {
                num_envs: 2,
                seed: Some(3),
                ..Default::default()
            },
            ..Default::default()
        };

        run_local(&config, RunArgs {
            steps: 50,
            dump: Some(path.clone()),
        })
        .unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 50);
        assert!(lines.iter().all(|line| line["id"].as_u64().unwrap() < 2));
        assert!(lines.iter().all(|line| line["next_state"].as_array().unwrap().len() == 16));
    }
}
