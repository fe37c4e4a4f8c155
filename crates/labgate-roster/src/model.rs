//! Validated roster records

use labgate_util::{MacAddress, StudentId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::{RosterError, RosterResult};

fn required(field: &str, value: impl Into<String>) -> RosterResult<String> {
    let value = value.into().trim().to_string();
    if value.is_empty() {
        return Err(RosterError::invalid(format!("{} cannot be empty", field)));
    }
    Ok(value)
}

/// A student allowed to open sessions once enrolled in an active course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub display_name: String,
    pub hardware_address: MacAddress,
}

impl Student {
    pub fn new(
        id: StudentId,
        display_name: impl Into<String>,
        hardware_address: MacAddress,
    ) -> RosterResult<Self> {
        Ok(Self {
            id,
            display_name: required("display_name", display_name)?,
            hardware_address,
        })
    }
}

/// Transport protocol of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl FromStr for Protocol {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(RosterError::invalid(format!("unknown protocol '{}'", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// A named service exposed by a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
}

impl Service {
    pub fn new(name: impl Into<String>, protocol: Protocol, port: u16) -> RosterResult<Self> {
        if port == 0 {
            return Err(RosterError::invalid("service port must be 1-65535"));
        }
        Ok(Self {
            name: required("service name", name)?,
            protocol,
            port,
        })
    }
}

/// A lab server and the services it offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub address: Ipv4Addr,
    pub services: Vec<Service>,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        address: Ipv4Addr,
        services: Vec<Service>,
    ) -> RosterResult<Self> {
        let name = required("server name", name)?;
        for (i, service) in services.iter().enumerate() {
            if services[..i]
                .iter()
                .any(|s| s.name.eq_ignore_ascii_case(&service.name))
            {
                return Err(RosterError::invalid(format!(
                    "server '{}' lists service '{}' twice",
                    name, service.name
                )));
            }
        }
        Ok(Self {
            name,
            address,
            services,
        })
    }

    /// Case-insensitive service lookup
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Lifecycle status of a course; only active courses grant access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    Active,
    Inactive,
    Completed,
}

impl FromStr for CourseStatus {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" | "DICTANDO" => Ok(CourseStatus::Active),
            "INACTIVE" | "INACTIVO" => Ok(CourseStatus::Inactive),
            "COMPLETED" | "FINALIZADO" => Ok(CourseStatus::Completed),
            other => Err(RosterError::invalid(format!("unknown course status '{}'", other))),
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseStatus::Active => f.write_str("ACTIVE"),
            CourseStatus::Inactive => f.write_str("INACTIVE"),
            CourseStatus::Completed => f.write_str("COMPLETED"),
        }
    }
}

/// Services of one server that a course's enrollment may reach
///
/// The server name is advisory: it may outlive the server it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntry {
    pub server_name: String,
    pub allowed_services: BTreeSet<String>,
}

impl GrantEntry {
    pub fn new<I, S>(server_name: impl Into<String>, allowed_services: I) -> RosterResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let server_name = required("grant server name", server_name)?;
        let mut services = BTreeSet::new();
        for service in allowed_services {
            let service = required("granted service name", service)?;
            if !services
                .iter()
                .any(|s: &String| s.eq_ignore_ascii_case(&service))
            {
                services.insert(service);
            }
        }
        Ok(Self {
            server_name,
            allowed_services: services,
        })
    }

    pub fn matches_server(&self, server_name: &str) -> bool {
        self.server_name.eq_ignore_ascii_case(server_name)
    }

    pub fn allows(&self, service_name: &str) -> bool {
        self.allowed_services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(service_name))
    }
}

/// A course with its enrollment and server grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub code: String,
    pub title: String,
    pub status: CourseStatus,
    pub enrolled_students: BTreeSet<StudentId>,
    pub server_grants: Vec<GrantEntry>,
}

impl Course {
    /// A course with no enrollment and no grants yet
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        status: CourseStatus,
    ) -> RosterResult<Self> {
        let code = required("course code", code)?;
        if code.chars().any(char::is_whitespace) {
            return Err(RosterError::invalid(format!(
                "course code '{}' contains whitespace",
                code
            )));
        }
        Ok(Self {
            code,
            title: required("course title", title)?,
            status,
            enrolled_students: BTreeSet::new(),
            server_grants: Vec::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == CourseStatus::Active
    }

    pub fn is_enrolled(&self, student_id: &StudentId) -> bool {
        self.enrolled_students.contains(student_id)
    }

    pub fn grant(&self, server_name: &str) -> Option<&GrantEntry> {
        self.server_grants
            .iter()
            .find(|g| g.matches_server(server_name))
    }
}

/// Profile edit for a student; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentUpdate {
    pub display_name: Option<String>,
    pub hardware_address: Option<MacAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerUpdate {
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub status: Option<CourseStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_rejects_port_zero_and_blank_name() {
        assert!(Service::new("ssh", Protocol::Tcp, 0).is_err());
        assert!(Service::new("  ", Protocol::Tcp, 22).is_err());
        assert_eq!(Service::new(" ssh ", Protocol::Tcp, 22).unwrap().name, "ssh");
    }

    #[test]
    fn server_rejects_duplicate_service_names() {
        let services = vec![
            Service::new("ssh", Protocol::Tcp, 22).unwrap(),
            Service::new("SSH", Protocol::Tcp, 2222).unwrap(),
        ];
        let result = Server::new("db1", Ipv4Addr::new(10, 0, 0, 3), services);
        assert!(matches!(result, Err(RosterError::InvalidInput(_))));
    }

    #[test]
    fn grant_matching_ignores_case() {
        let grant = GrantEntry::new("Servidor 1", ["SSH", "ssh", "web"]).unwrap();
        assert_eq!(grant.allowed_services.len(), 2);
        assert!(grant.matches_server("servidor 1"));
        assert!(grant.allows("Ssh"));
        assert!(!grant.allows("ftp"));
    }

    #[test]
    fn parse_status_and_protocol() {
        assert_eq!("active".parse::<CourseStatus>().unwrap(), CourseStatus::Active);
        assert!("DICTATING".parse::<CourseStatus>().is_err());
        assert_eq!("dictando".parse::<CourseStatus>().unwrap(), CourseStatus::Active);
        assert_eq!("FINALIZADO".parse::<CourseStatus>().unwrap(), CourseStatus::Completed);
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert!("icmp".parse::<Protocol>().is_err());
    }

    #[test]
    fn course_code_rejects_whitespace() {
        assert!(Course::new("CS 101", "Networks", CourseStatus::Active).is_err());
        let course = Course::new("CS101", "Networks", CourseStatus::Active).unwrap();
        assert!(course.is_active());
        assert!(course.enrolled_students.is_empty());
    }
}
