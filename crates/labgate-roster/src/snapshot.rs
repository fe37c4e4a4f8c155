//! Roster snapshot load/save

use labgate_util::MacAddress;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    Course, CourseStatus, GrantEntry, Protocol, RawCourse, RawGrant, RawServer, RawService,
    RawSnapshot, RawStudent, RecordKind, Roster, RosterError, Server, Service, Student,
};

/// A single problem found while loading a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{key}': {message}")]
pub struct ValidationError {
    pub kind: RecordKind,
    pub key: String,
    pub message: String,
}

impl ValidationError {
    fn new(kind: RecordKind, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            message: message.into(),
        }
    }

    fn from_roster(kind: RecordKind, key: impl Into<String>, err: RosterError) -> Self {
        Self::new(kind, key, err.to_string())
    }
}

/// Snapshot errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to access snapshot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse snapshot YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Snapshot validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Load and validate a roster snapshot from a YAML file
pub fn load_snapshot(path: impl AsRef<Path>) -> SnapshotResult<Roster> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let roster = parse_snapshot(&content)?;
    info!(
        path = %path.display(),
        students = roster.students().len(),
        servers = roster.servers().len(),
        courses = roster.courses().len(),
        "Roster snapshot loaded"
    );
    Ok(roster)
}

/// Parse and validate a roster snapshot from a YAML string.
///
/// Every problem in the document is collected before failing.
pub fn parse_snapshot(content: &str) -> SnapshotResult<Roster> {
    let raw: RawSnapshot = serde_yaml::from_str(content)?;
    build_roster(raw)
}

/// Write a roster snapshot to a YAML file.
///
/// The document is written next to the target and renamed into place.
pub fn save_snapshot(path: impl AsRef<Path>, roster: &Roster) -> SnapshotResult<()> {
    let path = path.as_ref();
    let content = render_snapshot(roster)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    info!(path = %path.display(), "Roster snapshot saved");
    Ok(())
}

/// Render a roster as a YAML snapshot document
pub fn render_snapshot(roster: &Roster) -> SnapshotResult<String> {
    Ok(serde_yaml::to_string(&to_raw(roster))?)
}

fn to_raw(roster: &Roster) -> RawSnapshot {
    RawSnapshot {
        students: roster
            .students()
            .iter()
            .map(|s| RawStudent {
                code: s.id.clone(),
                name: s.display_name.clone(),
                mac: s.hardware_address.to_string(),
            })
            .collect(),
        servers: roster
            .servers()
            .iter()
            .map(|s| RawServer {
                name: s.name.clone(),
                ip: s.address.to_string(),
                services: s
                    .services
                    .iter()
                    .map(|svc| RawService {
                        name: svc.name.clone(),
                        protocol: svc.protocol.to_string(),
                        port: i64::from(svc.port),
                    })
                    .collect(),
            })
            .collect(),
        courses: roster
            .courses()
            .iter()
            .map(|c| RawCourse {
                code: c.code.clone(),
                title: c.title.clone(),
                status: c.status.to_string(),
                students: c.enrolled_students.iter().cloned().collect(),
                servers: c
                    .server_grants
                    .iter()
                    .map(|g| RawGrant {
                        name: g.server_name.clone(),
                        allowed_services: g.allowed_services.iter().cloned().collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn build_roster(raw: RawSnapshot) -> SnapshotResult<Roster> {
    let mut roster = Roster::new();
    let mut errors = Vec::new();

    for student in raw.students {
        if let Err(e) = convert_student(&student).and_then(|s| {
            roster
                .add_student(s)
                .map_err(|e| ValidationError::from_roster(RecordKind::Student, student.code.as_str(), e))
        }) {
            errors.push(e);
        }
    }

    for server in raw.servers {
        if let Err(e) = convert_server(&server).and_then(|s| {
            roster
                .add_server(s)
                .map_err(|e| ValidationError::from_roster(RecordKind::Server, &server.name, e))
        }) {
            errors.push(e);
        }
    }

    for course in raw.courses {
        errors.extend(add_course(&mut roster, course));
    }

    if !errors.is_empty() {
        debug!(error_count = errors.len(), "Snapshot rejected");
        return Err(SnapshotError::ValidationFailed { errors });
    }

    Ok(roster)
}

fn convert_student(raw: &RawStudent) -> Result<Student, ValidationError> {
    let key = raw.code.as_str();
    let mac: MacAddress = raw
        .mac
        .parse()
        .map_err(|e: labgate_util::MacParseError| {
            ValidationError::new(RecordKind::Student, key, e.to_string())
        })?;
    Student::new(raw.code.clone(), raw.name.clone(), mac)
        .map_err(|e| ValidationError::from_roster(RecordKind::Student, key, e))
}

fn convert_server(raw: &RawServer) -> Result<Server, ValidationError> {
    let address: Ipv4Addr = raw.ip.trim().parse().map_err(|_| {
        ValidationError::new(
            RecordKind::Server,
            &raw.name,
            format!("invalid IPv4 address '{}'", raw.ip),
        )
    })?;

    let services = raw
        .services
        .iter()
        .map(|svc| convert_service(&raw.name, svc))
        .collect::<Result<Vec<_>, _>>()?;

    Server::new(raw.name.clone(), address, services)
        .map_err(|e| ValidationError::from_roster(RecordKind::Server, &raw.name, e))
}

fn convert_service(server: &str, raw: &RawService) -> Result<Service, ValidationError> {
    let key = format!("{}/{}", server, raw.name);
    let protocol: Protocol = raw
        .protocol
        .parse()
        .map_err(|e| ValidationError::from_roster(RecordKind::Service, &key, e))?;
    let port = u16::try_from(raw.port).map_err(|_| {
        ValidationError::new(
            RecordKind::Service,
            &key,
            format!("port {} out of range", raw.port),
        )
    })?;
    Service::new(raw.name.clone(), protocol, port)
        .map_err(|e| ValidationError::from_roster(RecordKind::Service, &key, e))
}

fn add_course(roster: &mut Roster, raw: RawCourse) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let status: CourseStatus = match raw.status.parse() {
        Ok(status) => status,
        Err(e) => {
            errors.push(ValidationError::from_roster(RecordKind::Course, &raw.code, e));
            return errors;
        }
    };

    let course = match Course::new(raw.code.clone(), raw.title.clone(), status) {
        Ok(course) => course,
        Err(e) => {
            errors.push(ValidationError::from_roster(RecordKind::Course, &raw.code, e));
            return errors;
        }
    };
    let code = course.code.clone();

    if let Err(e) = roster.add_course(course) {
        errors.push(ValidationError::from_roster(RecordKind::Course, &code, e));
        return errors;
    }

    for student_id in &raw.students {
        if let Err(e) = roster.enroll(&code, student_id) {
            errors.push(ValidationError::from_roster(
                RecordKind::Enrollment,
                format!("{}/{}", code, student_id),
                e,
            ));
        }
    }

    for grant in raw.servers {
        let key = format!("{}/{}", code, grant.name);
        if let Err(e) = GrantEntry::new(grant.name, grant.allowed_services)
            .and_then(|g| roster.add_grant(&code, g))
        {
            errors.push(ValidationError::from_roster(RecordKind::Grant, key, e));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_util::StudentId;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
students:
  - code: 1001
    name: Ana Torres
    mac: "00:00:00:00:00:01"
  - code: 1002
    name: Luis Vega
    mac: "00:00:00:00:00:02"
servers:
  - name: db1
    ip: 10.0.0.3
    services:
      - { name: ssh, protocol: TCP, port: 22 }
      - { name: web, protocol: TCP, port: 80 }
courses:
  - code: CS101
    title: Networks
    status: ACTIVE
    students: [1001]
    servers:
      - name: db1
        allowed_services: [ssh]
  - code: CS050
    title: Intro
    status: COMPLETED
    students: [1001, 1002]
"#;

    #[test]
    fn parse_sample_snapshot() {
        let roster = parse_snapshot(SAMPLE).unwrap();
        assert_eq!(roster.students().len(), 2);
        assert_eq!(roster.server("DB1").unwrap().services.len(), 2);

        let course = roster.course("CS101").unwrap();
        assert!(course.is_active());
        assert!(course.is_enrolled(&StudentId::parse("1001").unwrap()));
        assert!(course.grant("db1").unwrap().allows("ssh"));
    }

    #[test]
    fn load_spanish_keyed_export() {
        let yaml = r#"
alumnos:
  - { codigo: 20216256, nombre: Ana Torres, mac: "00:00:00:00:00:01" }
cursos:
  - codigo: TEL354
    estado: DICTANDO
    nombre: Redes
    alumnos: [20216256]
    servidores:
      - { nombre: Servidor 1, servicios_permitidos: [ssh] }
servidores:
  - nombre: Servidor 1
    ip: 10.0.0.3
    servicios:
      - { nombre: ssh, protocolo: TCP, puerto: 22 }
"#;

        let roster = parse_snapshot(yaml).unwrap();
        let course = roster.course("TEL354").unwrap();
        assert!(course.is_active());
        assert!(course.is_enrolled(&StudentId::parse("20216256").unwrap()));
        assert!(course.grant("servidor 1").unwrap().allows("SSH"));
        assert_eq!(roster.server("Servidor 1").unwrap().services[0].port, 22);

        // written back with the current keys
        let rendered = render_snapshot(&roster).unwrap();
        assert!(rendered.contains("students:"));
        assert!(rendered.contains("status: ACTIVE"));
    }

    #[test]
    fn collect_every_validation_error() {
        let yaml = r#"
students:
  - { code: 1001, name: Ana, mac: "not-a-mac" }
servers:
  - name: db1
    ip: 10.0.0.999
  - name: web1
    ip: 10.0.0.4
    services:
      - { name: web, protocol: TCP, port: 70000 }
courses:
  - code: CS101
    title: Networks
    status: TEACHING
  - code: CS102
    title: Security
    status: ACTIVE
    students: [4242]
"#;

        match parse_snapshot(yaml) {
            Err(SnapshotError::ValidationFailed { errors }) => {
                assert_eq!(errors.len(), 5);
                assert!(errors.iter().any(|e| e.kind == RecordKind::Enrollment));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn reject_duplicate_keys() {
        let yaml = r#"
students:
  - { code: 1001, name: Ana, mac: "00:00:00:00:00:01" }
  - { code: "1001", name: Ana Again, mac: "00:00:00:00:00:02" }
"#;

        assert!(matches!(
            parse_snapshot(yaml),
            Err(SnapshotError::ValidationFailed { errors }) if errors.len() == 1
        ));
    }

    #[test]
    fn save_then_load_preserves_roster() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("roster.yaml");

        let roster = parse_snapshot(SAMPLE).unwrap();
        save_snapshot(&path, &roster).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("code: 1001"), "numeric codes stay integers:\n{}", text);

        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, roster);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_snapshot(dir.path().join("absent.yaml")),
            Err(SnapshotError::Io(_))
        ));
    }
}
