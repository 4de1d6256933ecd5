//! Duel Arena Client - headless player driving a random agent

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duel_arena::client::{ClientState, GameClient, RenderState};
use duel_arena::config::ClientConfig;
use duel_arena::game::BodySpec;
use duel_arena::net::TcpClient;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_env()?;
    init_tracing(&config.log_level);

    let body = match &config.body_spec {
        Some(json) => BodySpec::from_json(json)?,
        None => BodySpec::test_body(),
    };
    info!(server = %config.server_addr, body = %body.name, "Starting Duel Arena Client");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("net-io")
        .build()?;
    let transport = runtime.block_on(TcpClient::connect(config.server_addr))?;

    let mut client = GameClient::new(transport, config.tick_length);
    client.connect(&body, &config.token)?;

    let mut rng = rand::thread_rng();
    let mut world = RenderState::new();
    let frame = Duration::from_secs_f64(1.0 / f64::from(config.frame_rate));
    let mut last_frame = Instant::now();
    let mut last_sent_tick = None;
    let mut frames: u64 = 0;
    let mut effects_seen: usize = 0;

    loop {
        client.poll();

        if client.state() == ClientState::Playing && last_sent_tick != Some(client.latest_tick()) {
            let action = (0..body.num_actions)
                .map(|_| i32::from(rng.gen_bool(0.5)))
                .collect();
            last_sent_tick = Some(client.send_action(action)?);
        }

        let now = Instant::now();
        client.update(now.duration_since(last_frame).as_secs_f64(), &mut world);
        last_frame = now;
        effects_seen += world.take_effects().len();

        frames += 1;
        if frames % u64::from(config.frame_rate) == 0 {
            if let Some(playback) = client.playback() {
                debug!(
                    playback_tick = playback.current_playback_tick(),
                    playback_secs = playback.playback_time(),
                    latest_tick = client.latest_tick(),
                    entities = world.entities.len(),
                    effects = effects_seen,
                    "Playback"
                );
            }
        }

        if client.state() == ClientState::Finished {
            break;
        }
        thread::sleep(frame);
    }

    info!(
        victor = ?client.victor(),
        me = ?client.player_number(),
        scores = ?client.scores(),
        "Match over"
    );

    runtime.shutdown_background();
    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
