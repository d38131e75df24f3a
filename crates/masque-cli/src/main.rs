//! Masque CLI
//!
//! Thin wrapper around masque-core for operating personas and anonymous
//! content from the command line.
//!
//! ## Usage
//!
//! ```bash
//! export ANONYMOUS_JWT_SECRET=...      # at least 32 bytes
//! export ANONYMOUS_SESSION_SECRET=...  # at least 32 bytes, different
//!
//! # Mark a professional user as verified in the local directory
//! masque user register alice
//!
//! # Create a persona (prints the private key once)
//! masque --user alice persona create
//!
//! # Switch to it and keep the session token
//! export MASQUE_TOKEN=$(masque --user alice persona switch <persona_id> --token-only)
//!
//! # Post anonymously
//! masque post create "hello from nowhere"
//!
//! # Read the feed
//! masque feed
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use masque_core::logging::AuditLayer;
use masque_core::{
    AnonymousContext, FeedFilter, LikeAction, MasqueConfig, MasqueEngine, ModeratorPostView,
    NewPost, PersonaId, PersonaUpdate, PostId, PostType, PublicPersonaView, PublicPostView,
    RequestContext, RequestHeaders, Upload, UserId, VerificationStatus,
};
use tracing_subscriber::prelude::*;
use zeroize::Zeroizing;

/// Masque - unlinkable personas for verified professionals
#[derive(Parser)]
#[command(name = "masque")]
#[command(version)]
#[command(about = "Masque - unlinkable personas for verified professionals")]
#[command(
    long_about = "Operate anonymous personas, sessions and tamper-evident posts against a local Masque data directory."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.masque/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Professional user acting on the owner side
    #[arg(short, long, global = true, env = "MASQUE_USER")]
    user: Option<String>,

    /// Anonymous session token for persona-side commands
    #[arg(short, long, global = true, env = "MASQUE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Professional user directory
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Persona management (requires --user)
    Persona {
        #[command(subcommand)]
        action: PersonaAction,
    },

    /// Anonymous posts (requires --token)
    Post {
        #[command(subcommand)]
        action: PostAction,
    },

    /// Show the public feed
    Feed {
        /// Only posts by this persona
        #[arg(long)]
        persona: Option<String>,
        /// Only posts of this type: text, image, video, mixed
        #[arg(long = "type")]
        post_type: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = masque_core::DEFAULT_FEED_LIMIT)]
        limit: u32,
    },

    /// Upload a file with metadata stripped (requires --token)
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// Show the traffic route plan for the session persona (requires --token)
    Route,

    /// End the anonymous session (requires --token)
    Logout,

    /// Report a post (anonymous with --token, professional with --user)
    Report {
        /// Post ID (ULID)
        post_id: String,
        /// Reason for the report
        reason: String,
    },

    /// Moderation tools
    Moderation {
        #[command(subcommand)]
        action: ModerationAction,
    },

    /// Hard-delete expired posts not held for moderation
    Purge,
}

#[derive(Subcommand)]
enum UserAction {
    /// Mark a user as verified
    Register {
        /// Professional user ID
        user_id: String,
    },
    /// Set a user's verification status
    Status {
        /// Professional user ID
        user_id: String,
        /// unverified, pending, verified, expired or rejected
        status: String,
    },
}

#[derive(Subcommand)]
enum PersonaAction {
    /// Create a new persona
    Create,
    /// List your personas
    List,
    /// Show a persona's public profile
    Show {
        /// Persona ID (base58)
        persona_id: String,
    },
    /// Update display name, avatar or default lifespan
    Update {
        /// Persona ID (base58)
        persona_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
        /// Default post lifespan in hours (0 = never expires)
        #[arg(long)]
        lifespan: Option<u32>,
    },
    /// Activate or deactivate a persona
    Activate {
        /// Persona ID (base58)
        persona_id: String,
        /// Deactivate instead
        #[arg(long)]
        off: bool,
    },
    /// Delete a persona and hide its posts
    Delete {
        /// Persona ID (base58)
        persona_id: String,
    },
    /// Switch to a persona and issue a session token
    Switch {
        /// Persona ID (base58)
        persona_id: String,
        /// Print only the token
        #[arg(long)]
        token_only: bool,
    },
}

#[derive(Subcommand)]
enum PostAction {
    /// Create a post
    Create {
        /// Post text
        content: Option<String>,
        /// Files to attach
        #[arg(short, long)]
        file: Vec<PathBuf>,
        /// Lifespan in hours (0 = never expires)
        #[arg(long)]
        lifespan: Option<u32>,
        /// Persona private key (hex) to sign the post with
        #[arg(long, env = "MASQUE_SIGNING_KEY", hide_env_values = true)]
        sign_key: Option<String>,
    },
    /// Show a post
    Show {
        /// Post ID (ULID)
        post_id: String,
    },
    /// Like or unlike a post
    Like {
        /// Post ID (ULID)
        post_id: String,
    },
    /// Comment on a post
    Comment {
        /// Post ID (ULID)
        post_id: String,
        /// Comment text
        content: String,
        /// Lifespan in hours
        #[arg(long)]
        lifespan: Option<u32>,
    },
    /// Delete one of your posts
    Delete {
        /// Post ID (ULID)
        post_id: String,
    },
}

#[derive(Subcommand)]
enum ModerationAction {
    /// Posts that are reported, removed or failed integrity checks
    Queue,
    /// Remove a post
    Remove {
        /// Post ID (ULID)
        post_id: String,
        /// Moderator note
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Restore a removed post
    Restore {
        /// Post ID (ULID)
        post_id: String,
    },
}

fn setup_logging(verbosity: u8, data_dir: &Path) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let audit = AuditLayer::new(data_dir.join("logs"), "cli")
        .context("Failed to open audit log")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(audit)
        .init();
    Ok(())
}

/// Get the default data directory (~/.masque/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".masque")
        .join("data")
}

fn user_agent() -> String {
    format!("masque-cli/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_persona_id(s: &str) -> Result<PersonaId> {
    PersonaId::from_base58(s).map_err(|e| anyhow::anyhow!("Invalid persona ID '{}': {}", s, e))
}

fn parse_post_id(s: &str) -> Result<PostId> {
    PostId::from_string(s).map_err(|e| anyhow::anyhow!("Invalid post ID '{}': {}", s, e))
}

fn parse_post_type(s: &str) -> Result<PostType> {
    match s.to_lowercase().as_str() {
        "text" => Ok(PostType::Text),
        "image" => Ok(PostType::Image),
        "video" => Ok(PostType::Video),
        "mixed" => Ok(PostType::Mixed),
        _ => anyhow::bail!(
            "Invalid post type '{}'. Must be one of: text, image, video, mixed",
            s
        ),
    }
}

fn parse_status(s: &str) -> Result<VerificationStatus> {
    match s.to_lowercase().as_str() {
        "unverified" => Ok(VerificationStatus::Unverified),
        "pending" => Ok(VerificationStatus::Pending),
        "verified" => Ok(VerificationStatus::Verified),
        "expired" => Ok(VerificationStatus::Expired),
        "rejected" => Ok(VerificationStatus::Rejected),
        _ => anyhow::bail!(
            "Invalid status '{}'. Must be one of: unverified, pending, verified, expired, rejected",
            s
        ),
    }
}

fn require_user(user: &Option<String>) -> Result<UserId> {
    user.as_deref()
        .map(UserId::new)
        .context("This command needs --user (or MASQUE_USER)")
}

async fn require_session(engine: &MasqueEngine, token: &Option<String>) -> Result<AnonymousContext> {
    let token = token
        .as_deref()
        .context("This command needs --token (or MASQUE_TOKEN)")?;
    engine
        .authenticate(token, &user_agent())
        .await
        .context("Session rejected")
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(Upload { name, bytes })
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_persona(persona: &PublicPersonaView) {
    println!("Persona: {}", persona.display_name);
    println!("  ID: {}", persona.persona_id);
    println!("  Public key hash: {}", persona.public_key_hash);
    println!("  Stealth address: {}", persona.stealth_address);
    if let Some(avatar) = &persona.avatar_url {
        println!("  Avatar: {}", avatar);
    }
    println!("  Active: {}", persona.is_active);
}

fn print_post(post: &PublicPostView) {
    println!("Post ({}):", post.post_type);
    println!("  ID: {}", post.post_id);
    println!("  Persona: {}", post.persona_id);
    if let Some(content) = &post.content {
        println!("  Content: {}", content);
    }
    for media in &post.media {
        println!("  Media: {}", media);
    }
    println!("  Created: {}", format_timestamp(post.created_at));
    if let Some(at) = post.disappears_at {
        println!("  Disappears: {}", format_timestamp(at));
    }
    println!("  Likes: {}", post.like_count);
    for comment in &post.comments {
        println!("  Comment from {}: {}", comment.persona_id, comment.content);
    }
}

fn print_moderated(view: &ModeratorPostView) {
    print_post(&view.post);
    println!("  Integrity: {:?}", view.integrity.status);
    if view.expired {
        println!("  Expired: yes");
    }
    for report in &view.reports {
        println!("  Report: {}", report.reason);
    }
    if let Some(removal) = &view.removal {
        println!("  Removed: {:?}", removal.reason);
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    setup_logging(cli.verbose, &data_dir)?;

    let config = MasqueConfig::from_env()?;
    let engine = MasqueEngine::new(&data_dir, config).await?;
    tracing::debug!(data_dir = %data_dir.display(), "Engine ready");

    match cli.command {
        Commands::User { action } => match action {
            UserAction::Register { user_id } => {
                engine
                    .set_verification_status(&UserId::new(&user_id), VerificationStatus::Verified)
                    .await?;
                println!("User registered as verified.");
            }

            UserAction::Status { user_id, status } => {
                let status = parse_status(&status)?;
                engine
                    .set_verification_status(&UserId::new(&user_id), status)
                    .await?;
                println!("Verification status updated.");
            }
        },

        Commands::Persona { action } => {
            let owner = require_user(&cli.user)?;
            match action {
                PersonaAction::Create => {
                    let created = engine.create_persona(&owner).await?;
                    if cli.json {
                        print_json(&serde_json::json!({
                            "persona": created.persona,
                            "private_identity": created.private_identity,
                            "session_token": created.session.token,
                            "expires_at": created.session.claims.expires_at,
                        }))?;
                    } else {
                        print_persona(&created.persona);
                        println!();
                        println!("Private identity (shown once, store it safely):");
                        println!("  Private key: {}", created.private_identity.private_key);
                        println!("  Salt: {}", created.private_identity.salt);
                        println!();
                        println!("Anonymous session:");
                        println!("  Token: {}", created.session.token);
                        println!(
                            "  Expires: {}",
                            format_timestamp(created.session.claims.expires_at)
                        );
                    }
                }

                PersonaAction::List => {
                    let personas = engine.my_personas(&owner).await?;
                    if cli.json {
                        print_json(&personas)?;
                    } else if personas.is_empty() {
                        println!("No personas.");
                    } else {
                        for persona in &personas {
                            print_persona(persona);
                        }
                    }
                }

                PersonaAction::Show { persona_id } => {
                    let persona = engine.get_persona(parse_persona_id(&persona_id)?).await?;
                    if cli.json {
                        print_json(&persona)?;
                    } else {
                        print_persona(&persona);
                    }
                }

                PersonaAction::Update {
                    persona_id,
                    name,
                    avatar,
                    lifespan,
                } => {
                    let update = PersonaUpdate {
                        display_name: name,
                        avatar_url: avatar,
                        default_content_lifespan_hours: lifespan,
                        security: None,
                    };
                    if update.is_empty() {
                        anyhow::bail!("Nothing to update: pass --name, --avatar or --lifespan");
                    }
                    let persona = engine
                        .update_persona(&owner, parse_persona_id(&persona_id)?, update)
                        .await?;
                    if cli.json {
                        print_json(&persona)?;
                    } else {
                        print_persona(&persona);
                    }
                }

                PersonaAction::Activate { persona_id, off } => {
                    let persona = engine
                        .set_persona_active(&owner, parse_persona_id(&persona_id)?, !off)
                        .await?;
                    if cli.json {
                        print_json(&persona)?;
                    } else {
                        print_persona(&persona);
                    }
                }

                PersonaAction::Delete { persona_id } => {
                    let deletion = engine
                        .delete_persona(&owner, parse_persona_id(&persona_id)?)
                        .await?;
                    println!("Persona deleted.");
                    println!("  ID: {}", deletion.persona_id);
                    println!("  Posts hidden: {}", deletion.hidden_posts);
                }

                PersonaAction::Switch {
                    persona_id,
                    token_only,
                } => {
                    let switched = engine
                        .switch_persona(&owner, parse_persona_id(&persona_id)?)
                        .await?;
                    if token_only {
                        println!("{}", switched.session.token);
                    } else if cli.json {
                        print_json(&serde_json::json!({
                            "persona": switched.persona,
                            "token": switched.session.token,
                            "expires_at": switched.session.claims.expires_at,
                        }))?;
                    } else {
                        print_persona(&switched.persona);
                        println!();
                        println!("Session:");
                        println!("  Token: {}", switched.session.token);
                        println!(
                            "  Expires: {}",
                            format_timestamp(switched.session.claims.expires_at)
                        );
                    }
                }
            }
        }

        Commands::Post { action } => match action {
            PostAction::Create {
                content,
                file,
                lifespan,
                sign_key,
            } => {
                let ctx = require_session(&engine, &cli.token).await?;
                let uploads = file
                    .iter()
                    .map(|path| read_upload(path))
                    .collect::<Result<Vec<_>>>()?;
                let post = NewPost {
                    content,
                    media: Vec::new(),
                    lifespan_hours: lifespan,
                    signing_key: sign_key.map(Zeroizing::new),
                };
                let view = engine.create_post(&ctx, post, uploads).await?;
                if cli.json {
                    print_json(&view)?;
                } else {
                    print_post(&view);
                }
            }

            PostAction::Show { post_id } => {
                let view = engine.get_post(parse_post_id(&post_id)?).await?;
                if cli.json {
                    print_json(&view)?;
                } else {
                    print_post(&view);
                }
            }

            PostAction::Like { post_id } => {
                let ctx = require_session(&engine, &cli.token).await?;
                match engine.toggle_like(&ctx, parse_post_id(&post_id)?).await? {
                    LikeAction::Liked => println!("Liked."),
                    LikeAction::Unliked => println!("Unliked."),
                }
            }

            PostAction::Comment {
                post_id,
                content,
                lifespan,
            } => {
                let ctx = require_session(&engine, &cli.token).await?;
                let comment = engine
                    .add_comment(&ctx, parse_post_id(&post_id)?, content, lifespan)
                    .await?;
                if cli.json {
                    print_json(&comment)?;
                } else {
                    println!("Comment added.");
                    println!("  ID: {}", comment.comment_id);
                }
            }

            PostAction::Delete { post_id } => {
                let ctx = require_session(&engine, &cli.token).await?;
                engine.delete_post(&ctx, parse_post_id(&post_id)?).await?;
                println!("Post deleted.");
            }
        },

        Commands::Feed {
            persona,
            post_type,
            page,
            limit,
        } => {
            let filter = FeedFilter {
                persona_id: persona.as_deref().map(parse_persona_id).transpose()?,
                post_type: post_type.as_deref().map(parse_post_type).transpose()?,
                page,
                limit,
            };
            let feed = engine.feed(filter).await?;
            if cli.json {
                print_json(&feed)?;
            } else {
                println!(
                    "Feed page {} ({} of {} posts):",
                    feed.page,
                    feed.posts.len(),
                    feed.total
                );
                for post in &feed.posts {
                    println!();
                    print_post(post);
                }
                if feed.has_more {
                    println!();
                    println!("More posts on page {}.", feed.page + 1);
                }
            }
        }

        Commands::Upload { path } => {
            let ctx = require_session(&engine, &cli.token).await?;
            let stored = engine.upload(&ctx, read_upload(&path)?).await?;
            if cli.json {
                print_json(&stored)?;
            } else {
                println!("Upload stored.");
                println!("  Media: {}", stored.path);
                println!("  Bytes: {}", stored.bytes_written);
                if stored.metadata_stripping_skipped {
                    println!("  Note: metadata stripping not supported for this file type");
                }
            }
        }

        Commands::Route => {
            let ctx = require_session(&engine, &cli.token).await?;
            let plan = engine.route_plan(&ctx).await?;
            if cli.json {
                print_json(&plan)?;
            } else if plan.is_direct() {
                println!("Route: direct");
                println!("  Padding block: {} bytes", plan.padding_block);
            } else {
                println!("Route: {} hops", plan.hops.len());
                println!("  Padding block: {} bytes", plan.padding_block);
                println!("  Noise level: {:.2}", plan.noise_level);
                for hop in &plan.hops {
                    println!("  Hop {} (ttl {}s, delay {}ms)", hop.node_id, hop.ttl_secs, hop.delay_ms);
                }
            }
        }

        Commands::Logout => {
            let ctx = require_session(&engine, &cli.token).await?;
            engine.logout(&ctx).await?;
            println!("Session ended.");
        }

        Commands::Report { post_id, reason } => {
            let headers = match (&cli.token, &cli.user) {
                (Some(token), _) => RequestHeaders::new()
                    .with("x-anonymous-mode", "true")
                    .with("authorization", format!("Bearer {}", token))
                    .with("user-agent", user_agent()),
                (None, Some(user)) => RequestHeaders::new().with("x-professional-user", user.as_str()),
                (None, None) => anyhow::bail!("Reporting needs --token or --user"),
            };
            let ctx = engine.resolve(headers).await?;
            engine
                .report_post(&ctx, parse_post_id(&post_id)?, reason)
                .await?;
            match ctx {
                RequestContext::Anonymous(_) => println!("Report filed anonymously."),
                RequestContext::Professional(_) => println!("Report filed."),
            }
        }

        Commands::Moderation { action } => match action {
            ModerationAction::Queue => {
                let queue = engine.moderation_queue().await?;
                if cli.json {
                    print_json(&queue)?;
                } else if queue.is_empty() {
                    println!("Moderation queue is empty.");
                } else {
                    for view in &queue {
                        print_moderated(view);
                        println!();
                    }
                }
            }

            ModerationAction::Remove { post_id, note } => {
                let view = engine.remove_post(parse_post_id(&post_id)?, note).await?;
                if cli.json {
                    print_json(&view)?;
                } else {
                    println!("Post removed.");
                    println!("  ID: {}", view.post.post_id);
                }
            }

            ModerationAction::Restore { post_id } => {
                let view = engine.restore_post(parse_post_id(&post_id)?).await?;
                if cli.json {
                    print_json(&view)?;
                } else {
                    println!("Post restored.");
                    println!("  ID: {}", view.post.post_id);
                }
            }
        },

        Commands::Purge => {
            let purged = engine.purge_expired().await?;
            println!("Purged {} expired posts.", purged);
        }
    }

    Ok(())
}
