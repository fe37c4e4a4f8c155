//! labctl - command-line client for labgated
//!
//! Each subcommand maps to one IPC command; the response is printed as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labgate_api::{Command, ResponseResult};
use labgate_ipc::IpcClient;
use labgate_roster::{
    Course, CourseStatus, CourseUpdate, GrantEntry, Protocol, Server, ServerUpdate, Service,
    ServiceUpdate, Student, StudentUpdate,
};
use labgate_util::{default_socket_path, Handler, MacAddress, StudentId};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// labctl - Manage the lab roster and connections
#[derive(Parser, Debug)]
#[command(name = "labctl")]
#[command(about = "Command-line client for labgated", long_about = None)]
struct Args {
    /// Socket path (or set LABGATE_SOCKET env var)
    #[arg(short, long, env = "LABGATE_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check that the service answers
    Ping,
    /// Service and controller health
    Health,
    /// Check whether a student may reach a service, without connecting
    Authorize {
        student_id: StudentId,
        server: String,
        service: String,
    },
    /// Open a connection for a student
    Connect {
        student_id: StudentId,
        server: String,
        service: String,
    },
    /// Tear down a connection by handler
    Disconnect { handler: Handler },
    /// List live connections
    Connections,
    /// Print events as they arrive
    Watch,
    #[command(subcommand)]
    Student(StudentCmd),
    #[command(subcommand)]
    Server(ServerCmd),
    #[command(subcommand)]
    Service(ServiceCmd),
    #[command(subcommand)]
    Course(CourseCmd),
    #[command(subcommand)]
    Grant(GrantCmd),
    #[command(subcommand)]
    Roster(RosterCmd),
}

#[derive(Subcommand, Debug)]
enum StudentCmd {
    List,
    Get {
        student_id: StudentId,
    },
    Add {
        student_id: StudentId,
        name: String,
        mac: MacAddress,
    },
    Update {
        student_id: StudentId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        mac: Option<MacAddress>,
    },
    /// Remove a student and all of their enrollments
    Remove {
        student_id: StudentId,
    },
}

#[derive(Subcommand, Debug)]
enum ServerCmd {
    List,
    Get {
        name: String,
    },
    Add {
        name: String,
        address: Ipv4Addr,
        /// Service as name:protocol:port, repeatable
        #[arg(long = "service", value_parser = parse_service)]
        services: Vec<Service>,
    },
    Update {
        name: String,
        #[arg(long)]
        address: Option<Ipv4Addr>,
    },
    /// Remove a server and every course grant naming it
    Remove {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceCmd {
    Add {
        server: String,
        name: String,
        protocol: Protocol,
        port: u16,
    },
    Update {
        server: String,
        name: String,
        #[arg(long)]
        protocol: Option<Protocol>,
        #[arg(long)]
        port: Option<u16>,
    },
    Remove {
        server: String,
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum CourseCmd {
    List,
    Get {
        code: String,
    },
    Add {
        code: String,
        title: String,
        #[arg(long, default_value = "ACTIVE")]
        status: CourseStatus,
    },
    Update {
        code: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<CourseStatus>,
    },
    Remove {
        code: String,
    },
    Enroll {
        code: String,
        student_id: StudentId,
    },
    Unenroll {
        code: String,
        student_id: StudentId,
    },
}

#[derive(Subcommand, Debug)]
enum GrantCmd {
    Add {
        code: String,
        server: String,
        services: Vec<String>,
    },
    /// Replace the services a grant allows
    Update {
        code: String,
        server: String,
        services: Vec<String>,
    },
    Remove {
        code: String,
        server: String,
    },
}

#[derive(Subcommand, Debug)]
enum RosterCmd {
    /// Replace the roster from a snapshot (default: configured roster path)
    Import { path: Option<PathBuf> },
    /// Write the roster to a snapshot (default: configured export path)
    Export { path: Option<PathBuf> },
}

fn parse_service(s: &str) -> Result<Service, String> {
    let mut parts = s.splitn(3, ':');
    let (Some(name), Some(protocol), Some(port)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("expected name:protocol:port, got '{}'", s));
    };
    let protocol: Protocol = protocol.parse().map_err(|e| format!("{}", e))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port '{}'", port))?;
    Service::new(name, protocol, port).map_err(|e| e.to_string())
}

/// Map a parsed subcommand to its IPC command
fn to_command(cmd: Cmd) -> Result<Command> {
    let command = match cmd {
        Cmd::Ping => Command::Ping,
        Cmd::Health => Command::GetHealth,
        Cmd::Authorize {
            student_id,
            server,
            service,
        } => Command::Authorize {
            student_id,
            server_name: server,
            service_name: service,
        },
        Cmd::Connect {
            student_id,
            server,
            service,
        } => Command::Connect {
            student_id,
            server_name: server,
            service_name: service,
        },
        Cmd::Disconnect { handler } => Command::Disconnect { handler },
        Cmd::Connections => Command::ListConnections,
        Cmd::Watch => Command::SubscribeEvents,

        Cmd::Student(cmd) => match cmd {
            StudentCmd::List => Command::ListStudents,
            StudentCmd::Get { student_id } => Command::GetStudent { student_id },
            StudentCmd::Add {
                student_id,
                name,
                mac,
            } => Command::AddStudent {
                student: Student::new(student_id, name, mac)?,
            },
            StudentCmd::Update {
                student_id,
                name,
                mac,
            } => Command::UpdateStudent {
                student_id,
                update: StudentUpdate {
                    display_name: name,
                    hardware_address: mac,
                },
            },
            StudentCmd::Remove { student_id } => Command::RemoveStudent { student_id },
        },

        Cmd::Server(cmd) => match cmd {
            ServerCmd::List => Command::ListServers,
            ServerCmd::Get { name } => Command::GetServer { name },
            ServerCmd::Add {
                name,
                address,
                services,
            } => Command::AddServer {
                server: Server::new(name, address, services)?,
            },
            ServerCmd::Update { name, address } => Command::UpdateServer {
                name,
                update: ServerUpdate { address },
            },
            ServerCmd::Remove { name } => Command::RemoveServer { name },
        },

        Cmd::Service(cmd) => match cmd {
            ServiceCmd::Add {
                server,
                name,
                protocol,
                port,
            } => Command::AddService {
                server_name: server,
                service: Service::new(name, protocol, port)?,
            },
            ServiceCmd::Update {
                server,
                name,
                protocol,
                port,
            } => Command::UpdateService {
                server_name: server,
                service_name: name,
                update: ServiceUpdate { protocol, port },
            },
            ServiceCmd::Remove { server, name } => Command::RemoveService {
                server_name: server,
                service_name: name,
            },
        },

        Cmd::Course(cmd) => match cmd {
            CourseCmd::List => Command::ListCourses,
            CourseCmd::Get { code } => Command::GetCourse { code },
            CourseCmd::Add {
                code,
                title,
                status,
            } => Command::AddCourse {
                course: Course::new(code, title, status)?,
            },
            CourseCmd::Update {
                code,
                title,
                status,
            } => Command::UpdateCourse {
                code,
                update: CourseUpdate { title, status },
            },
            CourseCmd::Remove { code } => Command::RemoveCourse { code },
            CourseCmd::Enroll { code, student_id } => Command::Enroll { code, student_id },
            CourseCmd::Unenroll { code, student_id } => Command::Unenroll { code, student_id },
        },

        Cmd::Grant(cmd) => match cmd {
            GrantCmd::Add {
                code,
                server,
                services,
            } => Command::AddGrant {
                code,
                grant: GrantEntry::new(server, services)?,
            },
            GrantCmd::Update {
                code,
                server,
                services,
            } => Command::UpdateGrant {
                code,
                server_name: server,
                allowed_services: services.into_iter().collect::<BTreeSet<_>>(),
            },
            GrantCmd::Remove { code, server } => Command::RemoveGrant {
                code,
                server_name: server,
            },
        },

        Cmd::Roster(cmd) => match cmd {
            RosterCmd::Import { path } => Command::ImportRoster { path },
            RosterCmd::Export { path } => Command::ExportRoster { path },
        },
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let watch = matches!(args.command, Cmd::Watch);
    let command = to_command(args.command)?;

    debug!(socket = %args.socket.display(), ?command, "Sending command");

    let mut client = IpcClient::connect(&args.socket)
        .await
        .with_context(|| format!("Failed to connect to labgated at {:?}", args.socket))?;

    if watch {
        let mut events = client.subscribe().await.context("Failed to subscribe")?;
        loop {
            let event = events.next().await.context("Event stream ended")?;
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    let response = client.send(command).await.context("Request failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(match response.result {
        ResponseResult::Ok(_) => ExitCode::SUCCESS,
        ResponseResult::Err(_) => ExitCode::FAILURE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Command {
        let args = Args::try_parse_from(argv).unwrap();
        to_command(args.command).unwrap()
    }

    #[test]
    fn connect_maps_to_command() {
        let command = parse(&["labctl", "connect", "1001", "db1", "ssh"]);
        assert!(matches!(
            command,
            Command::Connect { ref student_id, ref server_name, ref service_name }
                if student_id.as_str() == "1001" && server_name == "db1" && service_name == "ssh"
        ));
    }

    #[test]
    fn server_add_parses_services() {
        let command = parse(&[
            "labctl", "server", "add", "db1", "10.0.0.3", "--service", "ssh:tcp:22", "--service",
            "web:TCP:80",
        ]);
        let Command::AddServer { server } = command else {
            panic!("expected add_server");
        };
        assert_eq!(server.services.len(), 2);
        assert_eq!(server.service("WEB").unwrap().port, 80);
    }

    #[test]
    fn invalid_records_fail_before_sending() {
        let args = Args::try_parse_from(["labctl", "course", "add", "CS 101", "Networks"]).unwrap();
        assert!(to_command(args.command).is_err());

        assert!(parse_service("ssh:tcp").is_err());
        assert!(parse_service("ssh:tcp:0").is_err());
        assert!(parse_service("ssh:sctp:22").is_err());
    }

    #[test]
    fn grant_update_collects_services() {
        let command = parse(&["labctl", "grant", "update", "CS101", "db1", "ssh", "web"]);
        assert!(matches!(
            command,
            Command::UpdateGrant { ref allowed_services, .. } if allowed_services.len() == 2
        ));
    }
}
