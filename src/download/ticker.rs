use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::status::{StatusSink, StatusUpdate};

/// Periodo por defecto entre mensajes de "sigo trabajando".
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(12);

const INITIAL_LINES: &[&str] = &[
    "🧠 Still thinking… really hard.",
    "🕵️‍♂️ Sneaking into the data’s secrets...",
    "🐢 Slow and steady decrypts the data.",
    "🛠️ Assembling ones and zeros like IKEA furniture.",
    "🧃 Juicing the bits... almost done squeezing.",
    "🐙 Wrestling an octopus of information... it's slippery.",
    "📡 Beaming signals to the data gods... awaiting prophecy.",
    "🐇 Chasing rabbits down logic holes... please stand by.",
    "🔄 Spinning wheels... hopefully not in vain.",
    "☕ Brewing results... do not disturb the data barista.",
];

const EXTENDED_LINES: &[&str] = &[
    "🧟 Still running… might’ve become self-aware.",
    "🏝️ Stranded on a deserted CPU… send snacks.",
    "🍞 Toasting data on a potato-powered server.",
    "🐓 Powered by carrier pigeon. One packet at a time.",
];

const EONS_LINES: &[&str] = &[
    "💀 If you're reading this, the task may have outlived us all.",
    "🖥️ Process is either running... or just pretending really well.",
];

/// Nivel de impaciencia según el número de tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerTier {
    Initial,
    Extended,
    Eons,
}

impl TickerTier {
    /// `tick` empieza en 1.
    pub fn for_tick(tick: u32) -> Self {
        match tick {
            0..=10 => Self::Initial,
            11..=20 => Self::Extended,
            _ => Self::Eons,
        }
    }

    pub fn lines(self) -> &'static [&'static str] {
        match self {
            Self::Initial => INITIAL_LINES,
            Self::Extended => EXTENDED_LINES,
            Self::Eons => EONS_LINES,
        }
    }

    fn pick(self) -> &'static str {
        self.lines()
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("⏳ Still working...")
    }
}

/// Emite una línea cada `period` hasta que `stop` se cancela.
///
/// Cada tick revisa `completed` antes de renderizar; el dueño marca la bandera,
/// cancela `stop` y espera esta tarea antes de enviar su reporte final.
pub(crate) async fn run_ticker(
    period: Duration,
    url: String,
    status: Arc<dyn StatusSink>,
    completed: Arc<AtomicBool>,
    stop: CancellationToken,
) -> u32 {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u32;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        if completed.load(Ordering::SeqCst) {
            break;
        }
        ticks += 1;
        let line = TickerTier::for_tick(ticks).pick().to_string();
        debug!("⏳ Tick {} para {}", ticks, url);
        status
            .update(StatusUpdate::StillWorking {
                line,
                url: url.clone(),
            })
            .await;
    }
    ticks
}
