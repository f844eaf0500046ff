use homewave_core::prelude::*;
use homewave_driver::{Manager, ManagerOptions};
use homewave_logging::{BackgroundLogger, Loglevel};
use std::sync::Arc;

/// Watches a Z-Wave network and prints everything it learns. Pass the
/// serial port as the first argument, e.g. `homewave /dev/ttyUSB0`.
#[tokio::main]
async fn main() {
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let user_path = std::env::args()
        .nth(2)
        .unwrap_or_else(|| ".".to_string());

    let manager = Manager::new(
        ManagerOptions::builder()
            .user_path(user_path)
            .log_sink(Arc::new(BackgroundLogger::new(Loglevel::Debug)))
            .build(),
    );

    manager.add_watcher(Box::new(|notification| match notification {
        Notification::DriverReady {
            home_id,
            controller_node,
        } => {
            println!("driver ready: home {} controller node {}", home_id, controller_node);
        }
        Notification::NodeQueriesComplete { node_id, .. } => {
            println!("node {} interviewed", node_id);
        }
        Notification::AllNodesQueried { .. } => println!("all nodes queried"),
        other => println!("{:?}", other),
    }));

    if let Err(e) = manager.add_driver(&port) {
        eprintln!("failed to open {}: {}", port, e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c()
        .await
        .expect("ctrl-c handler installed");
    println!("shutting down, saving network state");
    manager.destroy();
}
