use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use rovlink::config::{SurfaceConfig, SONAR_DEFAULTS, VIDEO_PORT_BASE};
use rovlink::store::{Scalar, Store};
use rovlink::surface::Connection;
use rovlink::topology::{Partition, Topology};
use rovlink::video::VideoFeed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("rovlink")
        .version("0.1.0")
        .about("Operator console for the ROV control and telemetry link")
        .arg(
            Arg::with_name("addr")
                .short("a")
                .long("addr")
                .value_name("ADDR")
                .help("Vehicle control-link address")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Connect as the control station and print live telemetry")
                .arg(
                    Arg::with_name("refresh")
                        .short("r")
                        .long("refresh")
                        .value_name("MS")
                        .help("Refresh rate in milliseconds")
                        .takes_value(true)
                        .default_value("1000"),
                )
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("FORMAT")
                        .help("Output format")
                        .takes_value(true)
                        .possible_values(&["json", "table"])
                        .default_value("table"),
                ),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Hold a value on the uplink while the link runs")
                .arg(Arg::with_name("key").help("Key to set").required(true))
                .arg(Arg::with_name("value").help("Value to send").required(true))
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("How long to keep the link up")
                        .takes_value(true)
                        .default_value("5"),
                ),
        )
        .subcommand(
            SubCommand::with_name("video")
                .about("Probe a video stream and report the frame rate")
                .arg(
                    Arg::with_name("port")
                        .short("p")
                        .long("port")
                        .value_name("PORT")
                        .help("Video stream port")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Probe duration")
                        .takes_value(true)
                        .default_value("5"),
                ),
        )
        .get_matches();

    let addr = matches
        .value_of("addr")
        .map(str::to_owned)
        .unwrap_or_else(|| SurfaceConfig::default().vehicle_addr);

    match matches.subcommand() {
        ("monitor", Some(sub)) => handle_monitor(sub, &addr).await?,
        ("set", Some(sub)) => handle_set(sub, &addr).await?,
        ("video", Some(sub)) => handle_video(sub, &addr).await?,
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("  {} Watch live telemetry", "rovlink monitor".bright_cyan());
            println!(
                "  {} Drive one actuator",
                "rovlink set Thr_FP 1600".bright_cyan()
            );
        }
    }

    Ok(())
}

async fn handle_monitor(
    matches: &ArgMatches<'_>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let refresh: u64 = matches.value_of("refresh").unwrap_or("1000").parse()?;
    let format = matches.value_of("format").unwrap_or("table");

    let store = Arc::new(Store::new(Topology::surface()));
    for (key, value) in SONAR_DEFAULTS {
        store.set(Partition::Surface, key, Scalar::Int(value));
    }
    tokio::spawn(Connection::new(Arc::clone(&store), addr).run());

    println!(
        "{}",
        "Monitoring vehicle telemetry (Press Ctrl+C to stop)..."
            .bright_blue()
            .bold()
    );
    let mut interval = tokio::time::interval(Duration::from_millis(refresh.max(50)));
    loop {
        interval.tick().await;
        let data = store.all(Partition::Surface);
        if format == "json" {
            println!("{}", serde_json::to_string(&data)?);
            continue;
        }
        let mut keys: Vec<&String> = data.keys().collect();
        keys.sort();
        if keys.is_empty() {
            println!("{}", "(no data yet)".dimmed());
            continue;
        }
        for key in keys {
            println!("{:>16}  {}", key.bright_white(), data[key.as_str()]);
        }
        println!("{}", "----".dimmed());
    }
}

async fn handle_set(
    matches: &ArgMatches<'_>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = matches.value_of("key").unwrap_or_default().to_owned();
    let raw = matches.value_of("value").unwrap_or_default();
    let duration: u64 = matches.value_of("duration").unwrap_or("5").parse()?;
    let value = parse_scalar(raw);

    let store = Arc::new(Store::new(Topology::surface()));
    store.set(Partition::Surface, &key, value.clone());

    println!(
        "{} holding {} = {} for {}s",
        "↑".green(),
        key.bright_white(),
        value.to_string().bright_cyan(),
        duration
    );
    let connection = Connection::new(Arc::clone(&store), addr);
    let _ = tokio::time::timeout(Duration::from_secs(duration), connection.run()).await;
    println!("{} link released, vehicle ramps back on its own", "✓".green());
    Ok(())
}

async fn handle_video(
    matches: &ArgMatches<'_>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let duration: u64 = matches.value_of("duration").unwrap_or("5").parse()?;
    let port: u16 = match matches.value_of("port") {
        Some(port) => port.parse()?,
        None => VIDEO_PORT_BASE,
    };
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    let video_addr = format!("{host}:{port}");

    let feed = VideoFeed::new(video_addr.clone());
    tokio::spawn(feed.clone().run());

    println!(
        "{} probing video stream at {}...",
        "▶".bright_blue(),
        video_addr.bright_white()
    );
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let frames = feed.frame_count();
    let fps = frames as f64 / duration as f64;
    match feed.latest() {
        Some(frame) => println!(
            "{} {} frames in {}s ({:.1} fps), last frame {} bytes",
            "✓".green(),
            frames,
            duration,
            fps,
            frame.len()
        ),
        None => println!("{} no frames received", "✗".red()),
    }
    Ok(())
}

fn parse_scalar(raw: &str) -> Scalar {
    if let Ok(value) = raw.parse::<i64>() {
        return Scalar::Int(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        return Scalar::Float(value);
    }
    Scalar::from(raw)
}
