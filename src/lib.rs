/*!
 # devserve

 A Rust library for running local web development servers for a project folder.

 ## Overview

 devserve provides functionality to:
 - Start a static file, Flask, Django or PHP built-in server on a chosen port
 - Verify the server is alive and accepting connections before reporting success
 - Relay the server's output as tagged log lines
 - Detect a server that exits on its own
 - Stop the server gracefully, escalating to a forced kill, and wait for the port to be released
 - Report the loopback and LAN URLs the server is reachable at

 One [`LifecycleManager`] owns exactly one server slot; starting a new server
 replaces the previous one.

 ## Basic Usage

 ```no_run
 use devserve::{Config, LaunchRequest, LifecycleManager, Result, ServerType};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Load settings, or use Config::default()
     let config = Config::from_file("devserve.json")?;
     let (manager, mut notifications) = LifecycleManager::new(config)?;

     // Print relayed output in the background
     tokio::spawn(async move {
         while let Some(notification) = notifications.recv().await {
             println!("{:?}", notification);
         }
     });

     // Start a Django project on port 8000
     let request = LaunchRequest::new("/path/to/project", 8000, ServerType::Django);
     let session = manager.start(request).await?;
     println!("Running at {}", session.addresses.join(", "));

     tokio::signal::ctrl_c().await?;
     manager.stop().await?;

     Ok(())
 }
 ```

 ## Features

 - **Single server slot**: start and stop are serialized, concurrent calls are rejected
 - **Server types**: in-process static file listener, Flask, Django and PHP built-in server
 - **Configuration**: interpreter commands, bind host and timeouts through a JSON config file
 - **Error Handling**: one specific, actionable error per failed call
 - **Async Support**: Full async/await support on Tokio
*/

pub mod config;
pub mod error;
pub mod server;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use server::{
    LaunchRequest, LifecycleManager, Notification, ServerSession, ServerStatus, ServerType,
};
