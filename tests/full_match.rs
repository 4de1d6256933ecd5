//! Plays whole matches between in-process clients over the memory transport

use duel_arena::app::{ServerApp, ServerOptions};
use duel_arena::client::{ClientState, GameClient, RenderState};
use duel_arena::game::{ArenaSettings, BodySpec, GameSettings, Tick};
use duel_arena::net::{MemoryClient, MemoryServer};

const TICK_LENGTH: f64 = 0.1;
const FRAME: f64 = 0.05;

struct Player {
    client: GameClient<MemoryClient>,
    world: RenderState,
    action: Vec<i32>,
    last_sent: Option<Tick>,
}

impl Player {
    fn new(transport: MemoryClient, action: Vec<i32>) -> Self {
        Self {
            client: GameClient::new(transport, TICK_LENGTH),
            world: RenderState::new(),
            action,
            last_sent: None,
        }
    }

    fn frame(&mut self) {
        self.client.poll();
        if self.client.state() == ClientState::Playing
            && self.last_sent != Some(self.client.latest_tick())
        {
            self.last_sent = Some(self.client.send_action(self.action.clone()).unwrap());
        }
        self.client.update(FRAME, &mut self.world);
    }
}

fn settings(max_ticks: u64) -> GameSettings {
    GameSettings {
        tick_length: TICK_LENGTH,
        sub_steps: 5,
        required_players: 2,
        arena: ArenaSettings {
            max_ticks,
            seed: 7,
            ..ArenaSettings::default()
        },
    }
}

#[test]
fn two_clients_play_a_match_to_the_end() {
    let transport = MemoryServer::new();
    let mut players = vec![
        Player::new(transport.connect(), vec![1, 0, 0, 0]),
        Player::new(transport.connect(), vec![0, 0, 0, 0]),
    ];
    let mut app = ServerApp::new(transport, settings(20), ServerOptions::default());

    for player in &mut players {
        player.client.connect(&BodySpec::test_body(), "").unwrap();
    }

    let mut now = 0.0;
    let mut finished = false;
    for _ in 0..1000 {
        finished = app.run_once(now).unwrap();
        for player in &mut players {
            player.frame();
        }
        if finished {
            break;
        }
        now += FRAME;
    }
    assert!(finished, "match never finished");

    let outcome = app.outcome().unwrap().clone();
    assert!(!outcome.aborted);
    assert_eq!(outcome.ticks, 20);

    for (index, player) in players.iter_mut().enumerate() {
        player.client.poll();
        assert_eq!(player.client.player_number(), Some(index));
        assert_eq!(player.client.state(), ClientState::Finished);
        assert_eq!(player.client.latest_tick(), outcome.ticks);
        assert_eq!(player.client.victor(), outcome.victor);
        assert_eq!(player.client.scores(), outcome.scores.as_slice());
        assert_eq!(player.client.body_specs().len(), 2);
    }

    // Catch playback up to the final snapshot
    let player = &mut players[0];
    player.client.update(10.0, &mut player.world);
    assert!(player.world.agents[0].y > -15.0, "thrusting body never moved");
    assert_eq!(player.world.agents[1].y, 15.0);

    app.shutdown();
}

#[test]
fn late_joiner_is_refused_once_the_roster_is_full() {
    let transport = MemoryServer::new();
    let first = transport.connect();
    let second = transport.connect();
    let third = transport.connect();
    let mut app = ServerApp::new(transport, settings(50), ServerOptions::default());

    let mut clients: Vec<_> = [first, second, third]
        .into_iter()
        .map(|t| GameClient::new(t, TICK_LENGTH))
        .collect();
    for client in &mut clients {
        client.connect(&BodySpec::test_body(), "").unwrap();
    }

    app.run_once(0.0).unwrap();
    for client in &mut clients {
        client.poll();
    }

    assert_eq!(clients[0].state(), ClientState::Playing);
    assert_eq!(clients[1].state(), ClientState::Playing);
    assert_eq!(clients[2].state(), ClientState::Connecting);
    assert_eq!(clients[2].player_number(), None);
    assert_eq!(app.players().len(), 2);
}
