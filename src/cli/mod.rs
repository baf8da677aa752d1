//! Command-line interface for quicktodo
//!
//! This module defines the CLI structure using clap derive macros.
//! Commands are grouped by what they touch: projects, tasks, locks, and the
//! live viewer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::ops::{Session, SessionOptions};
use crate::output::OutputOptions;
use crate::registry::RegistryEntry;

mod lock;
mod project;
mod serve;
mod sync;
mod task;

/// quicktodo - file-backed task tracking for humans and agents
///
/// Tasks live in one JSON document per project. Every change takes the
/// project lock, so concurrent agents never lose each other's updates.
#[derive(Parser, Debug)]
#[command(name = "quicktodo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration directory (defaults to ~/.config/quicktodo)
    #[arg(long, global = true, env = "QUICKTODO_HOME")]
    pub config_dir: Option<PathBuf>,

    /// Project name (defaults to the project registered for the current directory)
    #[arg(long, global = true, env = "QUICKTODO_PROJECT")]
    pub project: Option<String>,

    /// Agent identifier recorded on task claims
    #[arg(long, global = true, env = "QUICKTODO_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Do not notify a running viewer
    #[arg(long, global = true)]
    pub no_notify: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register the current directory as a project
    Init {
        /// Project name (defaults to the directory name)
        name: Option<String>,

        /// Project description
        #[arg(short, long)]
        description: Option<String>,

        /// Directory to register (defaults to the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Create a task
    #[command(visible_alias = "new-task")]
    CreateTask {
        /// Task title
        title: String,

        /// Task description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Task priority: low, medium, high (defaults to config)
        #[arg(short, long)]
        priority: Option<String>,

        /// Assign the task
        #[arg(long)]
        assign: Option<String>,
    },

    /// List tasks with optional filters
    #[command(visible_alias = "show-tasks")]
    ListTasks {
        /// Filter by status: pending, in_progress, done
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by priority: low, medium, high
        #[arg(short, long)]
        priority: Option<String>,

        /// Filter by assignee
        #[arg(short, long)]
        assigned_to: Option<String>,

        /// Filter by claim holder
        #[arg(long)]
        locked_by: Option<String>,
    },

    /// Show one task
    #[command(visible_aliases = ["display-task", "get-task"])]
    ShowTask {
        /// Task ID
        id: u64,
    },

    /// Set a task's status
    SetTaskStatus {
        /// Task ID
        id: u64,

        /// New status: pending, in_progress, done
        status: String,
    },

    /// Mark a task done
    #[command(visible_alias = "mark-done")]
    MarkCompleted {
        /// Task ID
        id: u64,
    },

    /// Mark a task in progress
    MarkInProgress {
        /// Task ID
        id: u64,
    },

    /// Mark a task pending
    MarkPending {
        /// Task ID
        id: u64,
    },

    /// Edit task fields
    #[command(visible_alias = "edit")]
    EditTask {
        /// Task ID
        id: u64,

        /// New title
        #[arg(short, long)]
        title: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New priority: low, medium, high
        #[arg(short, long)]
        priority: Option<String>,

        /// Assign the task
        #[arg(long, conflicts_with = "unassign")]
        assign: Option<String>,

        /// Clear the assignee
        #[arg(long)]
        unassign: bool,
    },

    /// Delete a task
    DeleteTask {
        /// Task ID
        id: u64,
    },

    /// Search task titles and descriptions
    Search {
        /// Case-insensitive text to find
        query: String,
    },

    /// Show a project summary
    Status,

    /// Claim a task for this agent
    Claim {
        /// Task ID
        id: u64,

        /// Take over a claim held by someone else
        #[arg(long)]
        force: bool,
    },

    /// Release this agent's claim on a task
    Unclaim {
        /// Task ID
        id: u64,

        /// Release a claim held by someone else
        #[arg(long)]
        force: bool,
    },

    /// List registered projects
    Projects,

    /// Unregister a project
    RemoveProject {
        /// Project name
        name: String,

        /// Also delete the project's tasks and backups
        #[arg(long)]
        delete_data: bool,
    },

    /// Unregister projects whose directories no longer exist
    Cleanup,

    /// Project lock administration
    #[command(subcommand)]
    Locks(LocksCommands),

    /// Mirror tasks into an AI TODO list file
    #[command(subcommand)]
    Sync(SyncCommands),

    /// Start the live viewer
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Print usage instructions for agents
    Context,
}

/// Lock subcommands
#[derive(Subcommand, Debug)]
pub enum LocksCommands {
    /// List locks held by live processes
    List,

    /// Remove locks older than a maximum age or held by dead processes
    Cleanup {
        /// Maximum lock age in seconds
        #[arg(long, default_value_t = 300)]
        max_age: u64,
    },

    /// Remove a project's lock regardless of holder
    ForceUnlock {
        /// Project name
        name: String,
    },
}

/// TODO mirror subcommands
#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Mirror task changes from now on
    Enable {
        /// TODO file to write (defaults to ai_todos.json in the config directory)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Stop mirroring task changes
    Disable,

    /// Show sync settings and mirrored items
    Status,

    /// Replace the current project's mirrored items with its tasks
    Full,
}

/// Global flags every command receives
#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub config_dir: Option<PathBuf>,
    pub project: Option<String>,
    pub agent_id: Option<String>,
    pub no_notify: bool,
    pub json: bool,
    pub quiet: bool,
}

impl CommonOptions {
    pub fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }

    pub fn open_session(&self) -> Result<Session> {
        let root = Config::resolve_root(self.config_dir.as_deref())?;
        Session::open(
            &root,
            SessionOptions {
                agent_id: self.agent_id.clone(),
                no_notify: self.no_notify,
            },
        )
    }

    /// The `--project` project, else the one registered for the current
    /// directory
    pub fn current_project(&self, session: &Session) -> Result<RegistryEntry> {
        match &self.project {
            Some(name) => session.project_by_name(name),
            None => session.resolve_project(&std::env::current_dir()?),
        }
    }
}

impl Cli {
    fn common(&self) -> CommonOptions {
        CommonOptions {
            config_dir: self.config_dir.clone(),
            project: self.project.clone(),
            agent_id: self.agent_id.clone(),
            no_notify: self.no_notify,
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let common = self.common();
        match self.command {
            Commands::Init {
                name,
                description,
                dir,
            } => project::run_init(project::InitOptions {
                name,
                description,
                dir,
                common,
            }),
            Commands::CreateTask {
                title,
                description,
                priority,
                assign,
            } => task::run_create(task::CreateOptions {
                title,
                description,
                priority,
                assign,
                common,
            }),
            Commands::ListTasks {
                status,
                priority,
                assigned_to,
                locked_by,
            } => task::run_list(task::ListOptions {
                status,
                priority,
                assigned_to,
                locked_by,
                common,
            }),
            Commands::ShowTask { id } => task::run_show(task::ShowOptions { id, common }),
            Commands::SetTaskStatus { id, status } => task::run_status(task::StatusOptions {
                id,
                status,
                common,
            }),
            Commands::MarkCompleted { id } => task::run_status(task::StatusOptions {
                id,
                status: "done".to_string(),
                common,
            }),
            Commands::MarkInProgress { id } => task::run_status(task::StatusOptions {
                id,
                status: "in_progress".to_string(),
                common,
            }),
            Commands::MarkPending { id } => task::run_status(task::StatusOptions {
                id,
                status: "pending".to_string(),
                common,
            }),
            Commands::EditTask {
                id,
                title,
                description,
                priority,
                assign,
                unassign,
            } => task::run_edit(task::EditOptions {
                id,
                title,
                description,
                priority,
                assign,
                unassign,
                common,
            }),
            Commands::DeleteTask { id } => task::run_delete(task::DeleteOptions { id, common }),
            Commands::Search { query } => task::run_search(task::SearchOptions { query, common }),
            Commands::Status => project::run_status(common),
            Commands::Claim { id, force } => task::run_claim(task::ClaimOptions {
                id,
                force,
                release: false,
                common,
            }),
            Commands::Unclaim { id, force } => task::run_claim(task::ClaimOptions {
                id,
                force,
                release: true,
                common,
            }),
            Commands::Projects => project::run_list(common),
            Commands::RemoveProject { name, delete_data } => {
                project::run_remove(project::RemoveOptions {
                    name,
                    delete_data,
                    common,
                })
            }
            Commands::Cleanup => project::run_cleanup(common),
            Commands::Locks(cmd) => match cmd {
                LocksCommands::List => lock::run_list(common),
                LocksCommands::Cleanup { max_age } => lock::run_cleanup(lock::CleanupOptions {
                    max_age,
                    common,
                }),
                LocksCommands::ForceUnlock { name } => {
                    lock::run_force_unlock(lock::ForceUnlockOptions { name, common })
                }
            },
            Commands::Sync(cmd) => match cmd {
                SyncCommands::Enable { file } => {
                    sync::run_enable(sync::EnableOptions { file, common })
                }
                SyncCommands::Disable => sync::run_disable(common),
                SyncCommands::Status => sync::run_status(common),
                SyncCommands::Full => sync::run_full(common),
            },
            Commands::Serve { port } => serve::run(serve::ServeOptions { port, common }),
            Commands::Context => project::run_context(common),
        }
    }
}
