use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tracing::{info, warn};

use tdmusic::auth::{self, TerminalPrompter};
use tdmusic::commands::{Flow, InterruptHandle, Shell};
use tdmusic::config::Config;
use tdmusic::output;
use tdmusic::session::Session;
use tdmusic::td::Gateway;
use tdmusic::td::json_client::TdJsonClient;
use tdmusic::updates::UpdateDispatcher;

/// How long to wait for TDLib to flush and report `Closed` on the way out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() {
    tdmusic::logging::init();
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tokio::fs::create_dir_all(&config.database_dir).await?;
    tokio::fs::create_dir_all(&config.files_dir).await?;

    let (client, updates) = TdJsonClient::start(config.td_verbosity)?;
    let gateway: Arc<dyn Gateway> = Arc::new(client);
    let session = Arc::new(Session::new());
    let dispatcher = UpdateDispatcher::new(session.clone(), gateway.clone(), config.tdlib_parameters());
    let dispatcher = tokio::spawn(dispatcher.run(updates));

    auth::bootstrap(&session, gateway.as_ref(), &mut TerminalPrompter).await?;
    let me = gateway.get_me().await?;
    println!("{}", output::login_banner(&me));

    let shell = Shell::new(gateway.clone(), session.clone(), &config);
    spawn_interrupt_listener(shell.interrupts(), gateway.clone(), session.clone());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = io::stdout();
    let flow = shell.run(stdin, &mut stdout).await?;

    // After `logOut` TDLib closes on its own.
    auth::shutdown(&session, gateway.as_ref(), flow == Flow::Exit, CLOSE_TIMEOUT).await;
    dispatcher.abort();
    Ok(())
}

/// Ctrl-C cancels a running download batch; anywhere else it closes the client and ends
/// the process.
fn spawn_interrupt_listener(interrupts: InterruptHandle, gateway: Arc<dyn Gateway>, session: Arc<Session>) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for Ctrl-C");
                return;
            }
            if interrupts.interrupt() {
                info!("interrupt: cancelling downloads");
                continue;
            }
            auth::shutdown(&session, gateway.as_ref(), true, CLOSE_TIMEOUT).await;
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}
