//! Raw roster snapshot schema (as read from and written to YAML)
//!
//! Snapshots are written with English keys. The Spanish keys of the older
//! lab roster tool (`alumnos`, `servidores`, `cursos`, ...) are accepted on
//! read.

use labgate_util::StudentId;
use serde::{Deserialize, Serialize};

/// Roster snapshot document: three top-level collections
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSnapshot {
    #[serde(default, alias = "alumnos")]
    pub students: Vec<RawStudent>,

    #[serde(default, alias = "servidores")]
    pub servers: Vec<RawServer>,

    #[serde(default, alias = "cursos")]
    pub courses: Vec<RawCourse>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStudent {
    /// Student code; integers when numeric
    #[serde(alias = "codigo")]
    pub code: StudentId,

    #[serde(alias = "nombre")]
    pub name: String,

    /// Hardware address, `aa:bb:cc:dd:ee:ff`
    pub mac: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawServer {
    #[serde(alias = "nombre")]
    pub name: String,

    /// IPv4 address in dotted form
    pub ip: String,

    #[serde(default, alias = "servicios")]
    pub services: Vec<RawService>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawService {
    #[serde(alias = "nombre")]
    pub name: String,

    /// "TCP" or "UDP"
    #[serde(alias = "protocolo")]
    pub protocol: String,

    /// Kept wide so out-of-range values are reported, not rejected by the parser
    #[serde(alias = "puerto")]
    pub port: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCourse {
    #[serde(alias = "codigo")]
    pub code: String,

    #[serde(alias = "nombre")]
    pub title: String,

    /// "ACTIVE", "INACTIVE" or "COMPLETED"
    #[serde(alias = "estado")]
    pub status: String,

    #[serde(default, alias = "alumnos")]
    pub students: Vec<StudentId>,

    #[serde(default, alias = "servidores")]
    pub servers: Vec<RawGrant>,
}

/// Server grant nested in a course
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawGrant {
    #[serde(alias = "nombre")]
    pub name: String,

    #[serde(default, alias = "servicios_permitidos")]
    pub allowed_services: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_document() {
        let yaml = r#"
students:
  - code: 1001
    name: Ana Torres
    mac: "00:00:00:00:00:01"
servers:
  - name: db1
    ip: 10.0.0.3
    services:
      - { name: ssh, protocol: TCP, port: 22 }
courses:
  - code: CS101
    title: Networks
    status: ACTIVE
    students: [1001]
    servers:
      - name: db1
        allowed_services: [ssh]
"#;

        let raw: RawSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.students.len(), 1);
        assert_eq!(raw.students[0].code.as_str(), "1001");
        assert_eq!(raw.servers[0].services[0].port, 22);
        assert_eq!(raw.courses[0].servers[0].allowed_services, vec!["ssh"]);
    }

    #[test]
    fn spanish_keys_are_accepted() {
        let yaml = r#"
alumnos:
  - codigo: 20216256
    nombre: Ana Torres
    mac: "00:00:00:00:00:01"
servidores:
  - nombre: Servidor 1
    ip: 10.0.0.3
    servicios:
      - { nombre: ssh, protocolo: TCP, puerto: 22 }
cursos:
  - codigo: TEL354
    estado: DICTANDO
    nombre: Redes
    alumnos: [20216256]
    servidores:
      - nombre: Servidor 1
        servicios_permitidos: [ssh]
"#;

        let raw: RawSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.students[0].code.as_str(), "20216256");
        assert_eq!(raw.servers[0].services[0].port, 22);
        assert_eq!(raw.courses[0].title, "Redes");
        assert_eq!(raw.courses[0].status, "DICTANDO");
        assert_eq!(raw.courses[0].servers[0].allowed_services, vec!["ssh"]);
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let raw: RawSnapshot = serde_yaml::from_str("students: []").unwrap();
        assert!(raw.servers.is_empty());
        assert!(raw.courses.is_empty());
    }
}
