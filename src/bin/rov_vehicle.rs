use std::sync::Arc;

use clap::{App, Arg};
use rovlink::config::{SerialEndpoint, VehicleConfig, CONTROL_PORT};
use rovlink::server::DispatchServer;
use rovlink::store::Store;
use rovlink::topology::{PeripheralId, Topology};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let default_port = CONTROL_PORT.to_string();
    let matches = App::new("rov-vehicle")
        .version("0.1.0")
        .about("Vehicle-side dispatch server: control socket plus peripheral serial links")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Control listener port")
                .takes_value(true)
                .default_value(&default_port),
        )
        .arg(
            Arg::with_name("serial")
                .long("serial")
                .value_name("PATH=ID")
                .help("Serial endpoint mapping, e.g. /dev/ttyACM1=PCU_T (repeatable)")
                .takes_value(true)
                .multiple(true),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(&default_port).parse()?;
    let mut config = VehicleConfig::default();
    config.bind_addr = format!("0.0.0.0:{port}");
    if let Some(values) = matches.values_of("serial") {
        config.serial = values
            .map(parse_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
    }

    info!(
        addr = %config.bind_addr,
        links = config.serial.len(),
        "starting vehicle dispatch server"
    );

    let store = Arc::new(Store::new(Topology::vehicle()));
    let server = DispatchServer::start(store, &config).await?;
    server.serve().await;
    Ok(())
}

fn parse_endpoint(raw: &str) -> Result<SerialEndpoint, Box<dyn std::error::Error>> {
    let (path, id) = raw
        .split_once('=')
        .ok_or("serial endpoint must be PATH=ID")?;
    let device = PeripheralId::from_wire(id)
        .ok_or_else(|| format!("unknown device identifier `{id}`"))?;
    Ok(SerialEndpoint {
        path: path.to_owned(),
        device,
    })
}
