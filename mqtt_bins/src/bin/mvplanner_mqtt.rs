use std::{path::PathBuf, sync::mpsc, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mvplan_controller::{reconcile, Executive, Fleet, MissionState, PlannerConfig};
use mvplan_structs::{
    allocation::AllocationEvent,
    geodesy::FlatEarth,
    task::Task,
    vehicle::{FutureStateEvent, VehicleState},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const TOPIC_STATE: &str = "/mvplanner/state";
const TOPIC_FUTURE: &str = "/mvplanner/future";
const TOPIC_EVENTS_IN: &str = "/mvplanner/allocation/in";
const TOPIC_EVENTS_OUT: &str = "/mvplanner/allocation";
const TOPIC_TASKS: &str = "/mvplanner/tasks";

#[derive(Parser, Debug)]
#[command(name = "mvplanner", version, about = "Multi-vehicle task allocation over MQTT")]
struct Args {
    /// Planner settings (TOML). Defaults are used when the file is missing.
    #[arg(short, long, env = "MVPLANNER_CONFIG", default_value = "mvplanner.toml")]
    config: PathBuf,

    #[arg(long, env = "MVPLANNER_MQTT", default_value = "mqtt://localhost:1883")]
    mqtt: String,

    /// Task list, overrides `tasks_file` from the config.
    #[arg(long, env = "MVPLANNER_TASKS")]
    tasks: Option<PathBuf>,

    /// JSON array of vehicles.
    #[arg(long, env = "MVPLANNER_FLEET", default_value = "fleet.json")]
    fleet: PathBuf,

    /// Run one planning cycle on the saved tasks and exit.
    #[arg(long)]
    once: bool,
}

/// Task list commands from the console.
#[derive(Deserialize, Debug)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum TaskCommand {
    Add { task: Task },
    Remove { name: String },
    Clear,
    CancelAll,
    Load { path: PathBuf },
    Save { path: PathBuf },
    Plan,
}

fn connect(uri: &str) -> Result<paho_mqtt::Client> {
    let mqtt_opts = paho_mqtt::CreateOptionsBuilder::new().server_uri(uri).finalize();
    let mqtt_cli = paho_mqtt::Client::new(mqtt_opts).context("creating MQTT client")?;
    let conn_opts = paho_mqtt::ConnectOptionsBuilder::new()
        .keep_alive_interval(std::time::Duration::from_secs(20))
        .finalize();
    mqtt_cli
        .connect(conn_opts)
        .with_context(|| format!("connecting to {}", uri))?;
    Ok(mqtt_cli)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        PlannerConfig::load(&args.config)?
    } else {
        warn!("{} not found, using default settings", args.config.display());
        PlannerConfig::default()
    };
    if let Some(tasks) = args.tasks {
        config.tasks_file = Some(tasks);
    }

    let state = match config.tasks_file.as_ref() {
        Some(path) => MissionState::with_tasks_file(path)
            .with_context(|| format!("loading tasks from {}", path.display()))?,
        None => MissionState::new(),
    };
    let fleet = Arc::new(
        Fleet::load(&args.fleet, chrono::Duration::seconds(config.vehicle_timeout_secs))
            .with_context(|| format!("loading fleet from {}", args.fleet.display()))?,
    );

    // Outgoing events go through their own client, like the incoming side.
    let (event_tx, event_rx) = mpsc::channel::<AllocationEvent>();
    let publisher = connect(&args.mqtt)?;
    std::thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(e) => {
                    error!("could not encode {:?}: {}", event, e);
                    continue;
                }
            };
            if let Err(e) = publisher.publish(paho_mqtt::Message::new(TOPIC_EVENTS_OUT, payload, 1)) {
                error!("could not publish allocation event: {}", e);
            }
        }
    });

    let exec = Executive::new(config, state, fleet.clone(), Arc::new(FlatEarth), Arc::new(event_tx));

    if args.once {
        let outcome = exec.plan_interactive().await?;
        for a in outcome.applied.iter() {
            println!("{} {} {} {:?}", a.plan_id, a.vehicle, a.start_time, a.tasks);
        }
        return Ok(());
    }

    let subscriber = connect(&args.mqtt)?;
    let incoming = subscriber.start_consuming();
    for topic in [TOPIC_STATE, TOPIC_FUTURE, TOPIC_EVENTS_IN, TOPIC_TASKS] {
        subscriber
            .subscribe(topic, 1)
            .with_context(|| format!("subscribing to {}", topic))?;
    }

    let shutdown = CancellationToken::new();
    let loop_handle = tokio::spawn({
        let exec = exec.clone();
        let shutdown = shutdown.clone();
        async move { exec.run(shutdown).await }
    });

    let runtime = tokio::runtime::Handle::current();
    let consumer = tokio::task::spawn_blocking({
        let exec = exec.clone();
        move || {
            for msg in incoming.iter() {
                let Some(msg) = msg else {
                    warn!("MQTT connection lost");
                    break;
                };
                if let Err(e) = handle(&exec, &fleet, &runtime, msg.topic(), msg.payload()) {
                    warn!("ignoring message on {}: {:#}", msg.topic(), e);
                }
            }
        }
    });

    info!("mvplanner running, broker {}", args.mqtt);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = consumer => warn!("stopped receiving messages"),
    }
    shutdown.cancel();
    loop_handle.await.context("planning loop")?;
    if subscriber.is_connected() {
        let _ = subscriber.disconnect(None::<paho_mqtt::DisconnectOptions>);
    }
    Ok(())
}

fn handle(
    exec: &Executive,
    fleet: &Fleet,
    runtime: &tokio::runtime::Handle,
    topic: &str,
    payload: &[u8],
) -> Result<()> {
    match topic {
        TOPIC_STATE => {
            let state: VehicleState = serde_json::from_slice(payload)?;
            fleet.report(state);
        }
        TOPIC_FUTURE => {
            let event: FutureStateEvent = serde_json::from_slice(payload)?;
            let reached = exec.state().lock().apply_projection(event, chrono::Utc::now());
            if let Some(current) = reached {
                fleet.report(current);
            }
        }
        TOPIC_EVENTS_IN => {
            let event: AllocationEvent = serde_json::from_slice(payload)?;
            let state = exec.state();
            let mut state = state.lock();
            reconcile::on_event(&mut state, &event, exec.sink());
        }
        TOPIC_TASKS => {
            let command: TaskCommand = serde_json::from_slice(payload)?;
            info!("task command {:?}", command);
            let state = exec.state();
            match command {
                TaskCommand::Add { task } => {
                    let name = state.lock().add_task(task);
                    info!("added {}", name);
                }
                TaskCommand::Remove { name } => {
                    if state.lock().remove_task(&name).is_none() {
                        warn!("no task named {}", name);
                    }
                }
                TaskCommand::Clear => state.lock().clear(exec.sink()),
                TaskCommand::CancelAll => {
                    state.lock().cancel_allocations(exec.sink());
                }
                TaskCommand::Load { path } => {
                    let n = state.lock().load_tasks(&path, exec.sink())?;
                    info!("loaded {} tasks from {}", n, path.display());
                }
                TaskCommand::Save { path } => state.lock().save_tasks(&path)?,
                TaskCommand::Plan => {
                    let exec = exec.clone();
                    // Failures also reach the console as a `failed` event.
                    runtime.spawn(async move {
                        match exec.plan_interactive().await {
                            Ok(outcome) => info!("{} allocations", outcome.applied.len()),
                            Err(e) => error!("no solution has been found: {}", e),
                        }
                    });
                }
            }
            state.lock().persist();
        }
        other => warn!("unexpected topic {}", other),
    }
    Ok(())
}
