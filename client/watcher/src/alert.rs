use std::{
    io::{self, Write},
    process::{Command, Stdio},
    sync::Arc,
    thread,
};

use crate::error::WatchError;

/// Something that gets the user's attention. Fire-and-forget: failures are
/// logged, never returned.
pub trait Alert: Send + Sync {
    fn name(&self) -> &'static str;
    fn alert(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn detect() -> Result<Self, WatchError> {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> Result<Self, WatchError> {
        match os.to_ascii_lowercase().as_str() {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" | "darwin" => Ok(Platform::MacOs),
            other => Err(WatchError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
        }
    }

    pub fn alert(&self) -> Box<dyn Alert> {
        match self {
            Platform::Linux => Box::new(ToneAlert::new(Tone::default())),
            Platform::Windows | Platform::MacOs => Box::new(TerminalBell),
        }
    }
}

pub struct TerminalBell;

impl Alert for TerminalBell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn alert(&self) {
        ring_bell();
    }
}

fn ring_bell() {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

/// Linear attack/decay/sustain/release envelope, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    pub duration: f32,
    pub sample_rate: u32,
    pub envelope: Envelope,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency: 880.0,
            duration: 0.4,
            sample_rate: 44_100,
            envelope: Envelope {
                attack: 0.0,
                decay: 0.24,
                sustain: 0.28,
                release: 0.09,
            },
        }
    }
}

impl Tone {
    /// Envelope gain at time `t`, interpolated between the breakpoints
    /// (0, 0) (a, 1) (a+d, s) (dur-r, s) (dur, 0).
    pub fn gain_at(&self, t: f32) -> f32 {
        let Envelope {
            attack,
            decay,
            sustain,
            release,
        } = self.envelope;
        let points = [
            (0.0, 0.0),
            (attack, 1.0),
            (attack + decay, sustain),
            (self.duration - release, sustain),
            (self.duration, 0.0),
        ];
        // With zero attack the first segment is degenerate and the tone starts at full gain.
        if t <= points[0].0 && attack > 0.0 {
            return 0.0;
        }
        if t >= self.duration {
            return 0.0;
        }
        for pair in points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if t <= x1 {
                // Zero-length segment: jump straight to its end value.
                if x1 <= x0 {
                    return y1;
                }
                return y0 + (y1 - y0) * (t - x0) / (x1 - x0);
            }
        }
        0.0
    }

    pub fn samples(&self) -> Vec<f32> {
        let count = (self.duration * self.sample_rate as f32).round() as usize;
        let step = 1.0 / self.sample_rate as f32;
        (0..count)
            .map(|index| {
                let t = index as f32 * step;
                (2.0 * std::f32::consts::PI * self.frequency * t).sin() * self.gain_at(t)
            })
            .collect()
    }
}

/// 16-bit mono PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

const PLAYERS: &[(&str, &[&str])] = &[("aplay", &["-q", "-"]), ("paplay", &[])];

/// Plays a synthesized tone through the first audio player found on PATH,
/// falling back to the terminal bell.
pub struct ToneAlert {
    wav: Arc<Vec<u8>>,
}

impl ToneAlert {
    pub fn new(tone: Tone) -> Self {
        Self {
            wav: Arc::new(encode_wav(&tone.samples(), tone.sample_rate)),
        }
    }
}

impl Alert for ToneAlert {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn alert(&self) {
        let wav = Arc::clone(&self.wav);
        let spawned = thread::Builder::new()
            .name("tone-player".to_string())
            .spawn(move || {
                if let Err(err) = play_wav(&wav) {
                    tracing::warn!(error = %err, "tone playback failed; ringing bell");
                    ring_bell();
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "could not start tone player");
            ring_bell();
        }
    }
}

fn play_wav(wav: &[u8]) -> io::Result<()> {
    play_with(PLAYERS, wav)
}

fn play_with(players: &[(&str, &[&str])], wav: &[u8]) -> io::Result<()> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no audio player found");
    for (program, args) in players {
        let mut child = match Command::new(program)
            .args(*args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                tracing::debug!(player = program, error = %err, "audio player unavailable");
                last_err = err;
                continue;
            }
        };
        let written = match child.stdin.take() {
            // Dropping stdin closes the pipe so the player sees EOF.
            Some(mut stdin) => stdin.write_all(wav),
            None => Ok(()),
        };
        if let Err(err) = written {
            // Reap the player before moving on to the next one.
            tracing::debug!(player = program, error = %err, "audio player rejected input");
            let _ = child.kill();
            let _ = child.wait();
            last_err = err;
            continue;
        }
        let status = child.wait()?;
        if status.success() {
            return Ok(());
        }
        last_err = io::Error::new(
            io::ErrorKind::Other,
            format!("{program} exited with {status}"),
        );
    }
    Err(last_err)
}
