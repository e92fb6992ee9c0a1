mod ui;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ui::ChatApp;
use whisker_chat::auth::{EnvToken, TOKEN_ENV_VAR};
use whisker_chat::config::{self, AppConfig};
use whisker_chat::storage::TokenStore;
use whisker_chat::{
    ChatSession, Conversation, RestClient, TokenProvider, UserId, user_id_from_jwt,
};

#[derive(Parser)]
#[command(
    name = "whisker_chat",
    version,
    about = "Terminal client for the cat app's private chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a JWT obtained from the web sign-in
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored JWT
    Logout,
    /// Print the user id carried by the stored JWT
    Whoami,
    /// Write the effective configuration to the config path
    InitConfig,
    /// Open a conversation with another user
    Chat {
        /// Peer user id
        #[arg(long)]
        peer: UserId,
        /// Local user id; defaults to the id inside the stored JWT
        #[arg(long)]
        user: Option<UserId>,
        /// Override the realtime endpoint
        #[arg(long, value_name = "URL")]
        ws_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env();

    match cli.command {
        Command::Login { token } => {
            let store = open_store(&app_config)?;
            store.save_token(token.trim())?;
            match user_id_from_jwt(token.trim()) {
                Some(id) => println!("Signed in as user {id}"),
                None => println!("Token stored, but it carries no user id"),
            }
        }
        Command::Logout => {
            open_store(&app_config)?.clear()?;
            println!("Signed out");
        }
        Command::Whoami => {
            let token = open_store(&app_config)?.load_token()?;
            match token.as_deref().and_then(user_id_from_jwt) {
                Some(id) => println!("{id}"),
                None => println!("Not signed in"),
            }
        }
        Command::InitConfig => {
            config::save_config(&cli.config, &app_config)
                .with_context(|| format!("writing {}", cli.config))?;
            println!("Wrote {}", cli.config);
        }
        Command::Chat { peer, user, ws_url } => {
            if let Some(url) = ws_url {
                app_config.ws_url = url;
            }
            run_chat(app_config, peer, user).await?;
        }
    }

    Ok(())
}

fn open_store(app_config: &AppConfig) -> anyhow::Result<TokenStore> {
    TokenStore::open(&app_config.token_db_path)
        .with_context(|| format!("opening credential store {}", app_config.token_db_path))
}

async fn run_chat(
    app_config: AppConfig,
    peer: UserId,
    user: Option<UserId>,
) -> anyhow::Result<()> {
    let tokens: Arc<dyn TokenProvider> = if std::env::var_os(TOKEN_ENV_VAR).is_some() {
        log::info!("Using bearer token from {TOKEN_ENV_VAR}");
        Arc::new(EnvToken::default())
    } else {
        Arc::new(open_store(&app_config)?)
    };

    let local_user = match user {
        Some(id) => Some(id),
        None => tokens
            .bearer_token()
            .await
            .as_deref()
            .and_then(user_id_from_jwt),
    };
    let Some(local_user) = local_user else {
        anyhow::bail!("Please sign in first (`whisker_chat login --token <JWT>`) or pass --user");
    };
    if local_user == peer {
        anyhow::bail!("Cannot open a conversation with yourself");
    }

    let rest = RestClient::new(app_config.api_base()?, tokens.clone());
    let conversation = Conversation::open(&rest, local_user, peer).await;
    let session = ChatSession::open(
        app_config.connection_settings()?,
        Some(local_user),
        tokens,
    );

    log::info!("Chat started as user {local_user} with user {peer}");
    ChatApp::new(session, conversation).run().await
}
