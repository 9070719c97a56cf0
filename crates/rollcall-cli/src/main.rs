use anyhow::Result;
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates both `AttendanceProxy` (async) and
// `AttendanceProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn check_in(&self, course_id: i64) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<()>;
    async fn enroll(&self, name: &str, student_no: &str, program: &str) -> zbus::Result<i64>;
    async fn add_course(&self, name: &str) -> zbus::Result<i64>;
    async fn list_courses(&self) -> zbus::Result<String>;
    async fn report(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from the camera
    Enroll {
        /// Full name of the person
        #[arg(long)]
        name: String,
        /// Student number
        #[arg(long)]
        student_no: String,
        /// Program or department
        #[arg(long)]
        program: String,
    },
    /// Run a check-in session for a course
    Checkin {
        /// Course id to record attendance against
        #[arg(long)]
        course: i64,
    },
    /// Cancel the check-in session currently on camera
    Cancel,
    /// Manage courses
    #[command(subcommand)]
    Courses(CourseCommands),
    /// Print the full attendance report
    Report,
    /// Show daemon status
    Status,
    /// List available camera devices (local, bypasses the daemon)
    Devices,
}

#[derive(Subcommand)]
enum CourseCommands {
    /// Create a course
    Add { name: String },
    /// List courses
    List,
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        let devices = rollcall_hw::Camera::list_devices();
        if devices.is_empty() {
            println!("No capture devices found");
        }
        for dev in devices {
            println!("{}\t{} ({})", dev.path, dev.name, dev.driver);
        }
        return Ok(());
    }

    let conn = if cli.session {
        zbus::Connection::session().await?
    } else {
        zbus::Connection::system().await?
    };
    let proxy = AttendanceProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll {
            name,
            student_no,
            program,
        } => {
            println!("Look at the camera...");
            let id = proxy.enroll(&name, &student_no, &program).await?;
            println!("Enrolled {name} (id {id})");
        }
        Commands::Checkin { course } => {
            println!("Look at the camera and blink...");
            let raw = proxy.check_in(course).await?;
            print_json(&raw)?;
        }
        Commands::Cancel => {
            proxy.cancel().await?;
            println!("Cancelled");
        }
        Commands::Courses(CourseCommands::Add { name }) => {
            let id = proxy.add_course(&name).await?;
            println!("Created course {name} (id {id})");
        }
        Commands::Courses(CourseCommands::List) => {
            let raw = proxy.list_courses().await?;
            print_json(&raw)?;
        }
        Commands::Report => {
            let raw = proxy.report().await?;
            print_json(&raw)?;
        }
        Commands::Status => {
            let raw = proxy.status().await?;
            print_json(&raw)?;
        }
        Commands::Devices => unreachable!(),
    }

    Ok(())
}
