use std::path::PathBuf;
use std::process::ExitCode;

use apollo_client::{
    connection::obtain_connection,
    login::{do_get_node_token, do_login},
    queues::{do_delete_queue, do_list_queues, do_put_queue},
    tasks::{do_describe_tasks, do_list_tasks, do_submit, kv_list_to_map},
    ClientError,
};
use apollo_lib::api::{JobSpec, Queue, TaskSpec};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::error;

#[derive(Parser)]
#[command(name = "apollo", about = "The Apollo compute-task scheduler client")]
struct Cli {
    /// Verbose output.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// The token file containing the connection token.
    #[arg(long, short = 't', global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn token_file(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(".apollo-token")
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Login and get the session token using your AWS credentials.
    Login {
        /// AWS profile.
        #[arg(long, short = 'p', default_value = "default")]
        profile: String,
        /// Server's host and port.
        #[arg(long, short = 's', default_value = "")]
        host: String,
    },
    /// Check connectivity with the server.
    Ping,
    /// Make a node-specific authentication token.
    GetNodeToken { node_id: String },
    /// Submit a task (or an array of tasks) into a queue.
    Submit(SubmitArgs),
    /// List tasks with optional filtering.
    List {
        #[arg(long, short = 'q')]
        queue: Option<String>,
        #[arg(long, short = 'j')]
        job: Option<String>,
        /// JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Inspect task details, including the environment.
    DescribeTask {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List task queues.
    ListQueues {
        #[arg(long, short = 'q')]
        queue: Option<String>,
        /// JSON output.
        #[arg(long)]
        json: bool,
    },
    /// Create or modify a queue.
    PutQueue(PutQueueArgs),
    /// Delete a queue; fails while tasks still reference it.
    DeleteQueue {
        #[arg(long, short = 'q')]
        queue: String,
    },
    /// Generate shell completion scripts.
    Completion {
        #[arg(value_enum, default_value_t = clap_complete::Shell::Bash)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// The queue to submit the task into.
    #[arg(long, short = 'q', required = true)]
    queue: String,

    /// The task's working directory within the image.
    #[arg(long, short = 'w', default_value = "/tmp")]
    pwd: String,

    /// Start task array index.
    #[arg(long = "start-index", short = 's', default_value_t = 0)]
    start_index: i64,

    /// End task array index.
    #[arg(long = "end-index", short = 'e', default_value_t = 1)]
    end_index: i64,

    /// The job name associated with this task.
    #[arg(long = "job-name", short = 'j', default_value = "")]
    job_name: String,

    /// How many task instances may fail before the job fails; -1 is no
    /// limit.
    #[arg(long = "max-failed-tasks", default_value_t = -1, allow_hyphen_values = true)]
    max_failed_tasks: i64,

    /// Task dependencies of this task.
    #[arg(long = "task-deps")]
    task_deps: Vec<String>,

    /// Subtask dependencies of this task.
    #[arg(long = "subtask-deps")]
    subtask_deps: Vec<String>,

    /// Maximum amount of RAM for the task.
    #[arg(long = "max-ram-mb", short = 'm', default_value_t = 1024)]
    max_ram_mb: i64,

    /// Expected amount of RAM for the task.
    #[arg(long = "expected-ram-mb", short = 'x', default_value_t = 512)]
    expected_ram_mb: i64,

    /// Docker image ID to run this task.
    #[arg(long = "docker-id", short = 'd', default_value = "")]
    docker_id: String,

    /// Docker repository to use.
    #[arg(long, short = 'p', default_value = "")]
    repo: String,

    /// Inherit the whole environment.
    #[arg(long = "inherit-env")]
    inherit_env: bool,

    /// Environment variables to set (k=v, repeatable).
    #[arg(long = "env")]
    env: Vec<String>,

    /// Can the task use all available CPUs?
    #[arg(long = "can-use-all-cpus", short = 'u', default_value_t = true, action = clap::ArgAction::Set)]
    can_use_all_cpus: bool,

    /// The timeout for the task in seconds.
    #[arg(long = "timeout", short = 'o', default_value_t = 600)]
    timeout: i64,

    /// The number of retries (within the total timeout) allowed.
    #[arg(long, short = 'r', default_value_t = 3)]
    retries: i64,

    /// Arbitrary tags to associate with the task (k=v, repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// The command line to run, after `--`.
    #[arg(last = true, required = true)]
    cmdline: Vec<String>,
}

impl SubmitArgs {
    fn into_task(self) -> Result<TaskSpec, ClientError> {
        let job = (!self.job_name.is_empty()).then(|| JobSpec {
            name: self.job_name.clone(),
            max_failed_count: self.max_failed_tasks,
        });

        let mut env_pairs: Vec<String> = Vec::new();
        if self.inherit_env {
            env_pairs.extend(std::env::vars().map(|(k, v)| format!("{k}={v}")));
        }
        env_pairs.extend(self.env.iter().cloned());

        Ok(TaskSpec {
            queue: self.queue,
            cmdline: self.cmdline,
            pwd: self.pwd,
            start_array_index: self.start_index,
            end_array_index: self.end_index,
            job,
            task_deps: self.task_deps,
            subtask_deps: self.subtask_deps,
            max_ram_mb: self.max_ram_mb,
            expected_ram_mb: self.expected_ram_mb,
            docker_image_id: self.docker_id,
            repo: self.repo,
            task_env: kv_list_to_map(&env_pairs)?,
            tags: kv_list_to_map(&self.tags)?,
            can_use_all_cpus: self.can_use_all_cpus,
            timeout_seconds: self.timeout,
            retries: self.retries,
        })
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let token_file = cli.token_file();

    match cli.command {
        Command::Login { profile, host } => do_login(&profile, &host, &token_file).await,
        Command::Ping => {
            let (client, _) = obtain_connection(&token_file)?;
            client.ping().await?;
            println!("OK");
            Ok(())
        }
        Command::GetNodeToken { node_id } => {
            let (client, info) = obtain_connection(&token_file)?;
            do_get_node_token(&client, &info.host, &node_id).await
        }
        Command::Submit(args) => {
            let task = args.into_task()?;
            let (client, _) = obtain_connection(&token_file)?;
            do_submit(&client, task).await
        }
        Command::List { queue, job, json } => {
            let (client, _) = obtain_connection(&token_file)?;
            do_list_tasks(&client, queue.as_deref(), job.as_deref(), json).await
        }
        Command::DescribeTask { ids } => {
            let (client, _) = obtain_connection(&token_file)?;
            do_describe_tasks(&client, &ids).await
        }
        Command::ListQueues { queue, json } => {
            let (client, _) = obtain_connection(&token_file)?;
            do_list_queues(&client, queue.as_deref(), json).await
        }
        Command::PutQueue(args) => {
            let queue = args.into_queue();
            let (client, _) = obtain_connection(&token_file)?;
            do_put_queue(&client, queue).await
        }
        Command::DeleteQueue { queue } => {
            let (client, _) = obtain_connection(&token_file)?;
            do_delete_queue(&client, &queue).await
        }
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "apollo", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[derive(clap::Args)]
struct PutQueueArgs {
    /// Queue name.
    #[arg(long, short = 'q', required = true)]
    queue: String,

    /// Launch template ID.
    #[arg(long = "launch-template-id", short = 'e', required = true)]
    launch_template_id: String,

    /// Comma-separated instance types.
    #[arg(long = "instance-types", short = 'i', required = true)]
    instance_types: String,

    /// Docker repository URL.
    #[arg(long = "docker-repository", short = 'r', required = true)]
    docker_repository: String,

    /// Docker repository login.
    #[arg(long = "docker-login", short = 'l', required = true)]
    docker_login: String,

    /// Docker repository password, use '-' to read it from stdin.
    #[arg(long = "docker-password", short = 'p', required = true)]
    docker_password: String,
}

impl PutQueueArgs {
    fn into_queue(self) -> Queue {
        Queue {
            name: self.queue,
            launch_template_id: self.launch_template_id,
            instance_types: self
                .instance_types
                .split(',')
                .map(str::to_string)
                .collect(),
            docker_repository: self.docker_repository,
            docker_login: self.docker_login,
            docker_password: self.docker_password,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    apollo_lib::logging::init_client_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
