//! Frametrace simulator - drive a synthetic host through frame capture
//!
//! Spawns worker threads that emit nested sections every frame through a
//! `MockHost`-backed plugin context, captures them with a `FrameChannel`
//! and prints a JSON summary.
//!
//! Usage:
//!     frametrace-sim
//!     frametrace-sim --frames 120 --threads 8 --capacity 64
//!     RUST_LOG=frametrace_core=debug frametrace-sim --events

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frametrace_core::host::{
    CategoryDesc, MarkerData, MarkerDesc, MarkerEvent, MarkerId, MockHost,
};
use frametrace_core::trace::FrameSummary;
use frametrace_core::{
    CapturedFrame, MockClock, PluginContext, TraceConfig, TraceInfo,
};

#[derive(Parser, Debug)]
#[command(name = "frametrace-sim")]
#[command(about = "Drive a synthetic host through frame capture")]
#[command(version)]
struct Args {
    /// Number of frames to simulate
    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Worker threads emitting sections each frame
    #[arg(long, default_value_t = 4)]
    threads: u32,

    /// Section nesting depth per worker
    #[arg(long, default_value_t = 3)]
    depth: u32,

    /// Event capacity of each exchanged buffer
    #[arg(long, default_value_t = 256)]
    capacity: usize,

    /// Sampling interval in milliseconds (0 = every frame)
    #[arg(long, default_value_t = 0)]
    rate_ms: u32,

    /// Simulated frame duration in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Path to a JSON `TraceConfig`
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Include every captured event in the output
    #[arg(long)]
    events: bool,
}

const CATEGORIES: [(&str, u32); 3] = [
    ("Physics", 0xff0000),
    ("Render", 0x00ff00),
    ("Audio", 0x0000ff),
];

#[derive(Serialize)]
struct Summary {
    frames: usize,
    events: u64,
    overflowed_frames: usize,
    last: TraceInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    captured: Vec<FrameSummary>,
}

struct Scene {
    markers: Vec<MarkerDesc<'static>>,
    default_marker: MarkerDesc<'static>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frametrace_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TraceConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => TraceConfig::default(),
    };

    let host = Arc::new(MockHost::new());
    let clock = Arc::new(MockClock::new());
    let context = PluginContext::builder(host.clone())
        .config(config.clone())
        .without_native_tracer()
        .without_extern_trace()
        .clock(clock.clone())
        .build()?;

    let frames = context.enable_frame_capture(args.capacity, args.rate_ms)?;

    // First boundary attaches the host now that capture is active.
    context.flip_frame();
    let scene = announce_scene(&context, &config.default_marker_name);

    let mut captured = Vec::new();
    for _ in 0..args.frames {
        emit_frame(&context, &host, &scene, &args);
        clock.advance(Duration::from_millis(args.frame_ms));
        context.flip_frame();
        captured.extend(frames.try_iter());
    }

    let last = context.capture().disable()?;
    captured.extend(frames.try_iter());
    context.unload();

    let summary = summarize(captured, last, args.events);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Create the categories and markers a real host would report
fn announce_scene(context: &PluginContext, default_marker_name: &str) -> Scene {
    let dispatcher = context.dispatcher();
    let mut markers = Vec::new();
    for (id, &(name, color)) in CATEGORIES.iter().enumerate() {
        let id = id as u16;
        dispatcher.on_create_category(&CategoryDesc { id, name, color });
        let marker = MarkerDesc {
            id: MarkerId(u64::from(id) + 1),
            category_id: id,
            name: leak(format!("{name}.Update")),
        };
        dispatcher.on_create_marker(&marker);
        markers.push(marker);
    }

    let default_marker = MarkerDesc {
        id: MarkerId(100),
        category_id: 0,
        name: leak(default_marker_name.to_string()),
    };
    dispatcher.on_create_marker(&default_marker);

    Scene {
        markers,
        default_marker,
    }
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

/// Nested sections from every worker, plus one named through the default marker
fn emit_frame(context: &PluginContext, host: &MockHost, scene: &Scene, args: &Args) {
    let dispatcher = context.dispatcher();
    thread::scope(|s| {
        for worker in 0..args.threads {
            s.spawn(move || {
                let thread_id = u64::from(worker) + 1;
                let nested: Vec<_> = (0..args.depth)
                    .map(|level| scene.markers[level as usize % scene.markers.len()])
                    .filter(|marker| host.has_marker_event_callback(marker.id))
                    .collect();

                for marker in &nested {
                    dispatcher.on_marker_event(&MarkerEvent::begin(*marker).on_thread(thread_id));
                }
                for marker in nested.iter().rev() {
                    dispatcher.on_marker_event(&MarkerEvent::end(*marker).on_thread(thread_id));
                }

                if host.has_marker_event_callback(scene.default_marker.id) {
                    let name: Vec<u8> = format!("Worker.{worker}")
                        .encode_utf16()
                        .flat_map(u16::to_ne_bytes)
                        .collect();
                    let data = [
                        MarkerData {
                            kind: 0,
                            bytes: &[],
                        },
                        MarkerData {
                            kind: 1,
                            bytes: &name,
                        },
                    ];
                    let marker = scene.default_marker;
                    dispatcher.on_marker_event(
                        &MarkerEvent::begin(marker)
                            .on_thread(thread_id)
                            .with_data(&data),
                    );
                    dispatcher.on_marker_event(&MarkerEvent::end(marker).on_thread(thread_id));
                }
            });
        }
    });
}

fn summarize(captured: Vec<CapturedFrame>, last: TraceInfo, with_events: bool) -> Summary {
    Summary {
        frames: captured.len(),
        events: captured
            .iter()
            .map(|frame| u64::from(frame.info.event_count))
            .sum(),
        overflowed_frames: captured
            .iter()
            .filter(|frame| frame.info.overflowed())
            .count(),
        last,
        captured: if with_events {
            captured.iter().map(CapturedFrame::to_summary).collect()
        } else {
            Vec::new()
        },
    }
}
