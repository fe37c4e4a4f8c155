//! In-memory roster store

use labgate_util::StudentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    Course, CourseUpdate, GrantEntry, RecordKind, RosterError, RosterResult, Server,
    ServerUpdate, Service, ServiceUpdate, Student, StudentUpdate,
};

/// Roster shared between the service tasks.
///
/// Authorization reads and roster mutations go through this one lock, so a
/// check always sees a consistent roster.
pub type SharedRoster = Arc<RwLock<Roster>>;

/// Record counts, for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterCounts {
    pub students: usize,
    pub servers: usize,
    pub courses: usize,
}

/// Students, servers and courses
///
/// Every mutation either applies completely or returns an error without
/// touching any record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    students: Vec<Student>,
    servers: Vec<Server>,
    courses: Vec<Course>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this roster for sharing across tasks
    pub fn into_shared(self) -> SharedRoster {
        Arc::new(RwLock::new(self))
    }

    pub fn counts(&self) -> RosterCounts {
        RosterCounts {
            students: self.students.len(),
            servers: self.servers.len(),
            courses: self.courses.len(),
        }
    }

    // Students

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn student(&self, id: &StudentId) -> RosterResult<&Student> {
        self.students
            .iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| RosterError::not_found(RecordKind::Student, id))
    }

    pub fn add_student(&mut self, student: Student) -> RosterResult<()> {
        if self.students.iter().any(|s| s.id == student.id) {
            return Err(RosterError::exists(RecordKind::Student, &student.id));
        }
        debug!(student_id = %student.id, "Student added");
        self.students.push(student);
        Ok(())
    }

    pub fn update_student(
        &mut self,
        id: &StudentId,
        update: StudentUpdate,
    ) -> RosterResult<&Student> {
        let display_name = match update.display_name {
            Some(name) if name.trim().is_empty() => {
                return Err(RosterError::invalid("display_name cannot be empty"));
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };

        let student = self
            .students
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| RosterError::not_found(RecordKind::Student, id))?;

        if let Some(name) = display_name {
            student.display_name = name;
        }
        if let Some(mac) = update.hardware_address {
            student.hardware_address = mac;
        }
        debug!(student_id = %id, "Student updated");
        Ok(student)
    }

    /// Remove a student and every enrollment that references it.
    ///
    /// Returns the codes of the courses the student was dropped from.
    pub fn remove_student(&mut self, id: &StudentId) -> RosterResult<Vec<String>> {
        let index = self
            .students
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| RosterError::not_found(RecordKind::Student, id))?;

        self.students.remove(index);

        let mut affected = Vec::new();
        for course in &mut self.courses {
            if course.enrolled_students.remove(id) {
                affected.push(course.code.clone());
            }
        }

        info!(student_id = %id, courses = ?affected, "Student removed");
        Ok(affected)
    }

    // Servers and services

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Case-insensitive server lookup
    pub fn server(&self, name: &str) -> RosterResult<&Server> {
        self.servers
            .iter()
            .find(|s| s.matches(name))
            .ok_or_else(|| RosterError::not_found(RecordKind::Server, name))
    }

    fn server_mut(&mut self, name: &str) -> RosterResult<&mut Server> {
        self.servers
            .iter_mut()
            .find(|s| s.matches(name))
            .ok_or_else(|| RosterError::not_found(RecordKind::Server, name))
    }

    pub fn add_server(&mut self, server: Server) -> RosterResult<()> {
        if self.servers.iter().any(|s| s.matches(&server.name)) {
            return Err(RosterError::exists(RecordKind::Server, &server.name));
        }
        debug!(server = %server.name, address = %server.address, "Server added");
        self.servers.push(server);
        Ok(())
    }

    pub fn update_server(&mut self, name: &str, update: ServerUpdate) -> RosterResult<&Server> {
        let server = self.server_mut(name)?;
        if let Some(address) = update.address {
            server.address = address;
        }
        debug!(server = %server.name, "Server updated");
        Ok(server)
    }

    /// Remove a server and strip it from every course's grants.
    ///
    /// Returns the codes of the courses that lost a grant.
    pub fn remove_server(&mut self, name: &str) -> RosterResult<Vec<String>> {
        let index = self
            .servers
            .iter()
            .position(|s| s.matches(name))
            .ok_or_else(|| RosterError::not_found(RecordKind::Server, name))?;

        let removed = self.servers.remove(index);

        let mut affected = Vec::new();
        for course in &mut self.courses {
            let before = course.server_grants.len();
            course
                .server_grants
                .retain(|g| !g.matches_server(&removed.name));
            if course.server_grants.len() != before {
                affected.push(course.code.clone());
            }
        }

        info!(server = %removed.name, courses = ?affected, "Server removed");
        Ok(affected)
    }

    pub fn add_service(&mut self, server_name: &str, service: Service) -> RosterResult<()> {
        let server = self.server_mut(server_name)?;
        if server.service(&service.name).is_some() {
            return Err(RosterError::exists(
                RecordKind::Service,
                format!("{}/{}", server.name, service.name),
            ));
        }
        debug!(server = %server.name, service = %service.name, "Service added");
        server.services.push(service);
        Ok(())
    }

    pub fn update_service(
        &mut self,
        server_name: &str,
        service_name: &str,
        update: ServiceUpdate,
    ) -> RosterResult<&Service> {
        if update.port == Some(0) {
            return Err(RosterError::invalid("service port must be 1-65535"));
        }

        let server = self.server_mut(server_name)?;
        let server_label = server.name.clone();
        let service = server
            .services
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(service_name))
            .ok_or_else(|| {
                RosterError::not_found(
                    RecordKind::Service,
                    format!("{}/{}", server_label, service_name),
                )
            })?;

        if let Some(protocol) = update.protocol {
            service.protocol = protocol;
        }
        if let Some(port) = update.port {
            service.port = port;
        }
        debug!(server = %server_label, service = %service.name, "Service updated");
        Ok(service)
    }

    /// Remove a service from a server. Grants naming it are left as-is.
    pub fn remove_service(&mut self, server_name: &str, service_name: &str) -> RosterResult<Service> {
        let server = self.server_mut(server_name)?;
        let index = server
            .services
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(service_name))
            .ok_or_else(|| {
                RosterError::not_found(
                    RecordKind::Service,
                    format!("{}/{}", server.name, service_name),
                )
            })?;
        let removed = server.services.remove(index);
        debug!(server = %server.name, service = %removed.name, "Service removed");
        Ok(removed)
    }

    // Courses

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn course(&self, code: &str) -> RosterResult<&Course> {
        self.courses
            .iter()
            .find(|c| c.code == code)
            .ok_or_else(|| RosterError::not_found(RecordKind::Course, code))
    }

    fn course_mut(&mut self, code: &str) -> RosterResult<&mut Course> {
        self.courses
            .iter_mut()
            .find(|c| c.code == code)
            .ok_or_else(|| RosterError::not_found(RecordKind::Course, code))
    }

    /// Add a course. Any enrollment it carries must reference known students.
    pub fn add_course(&mut self, course: Course) -> RosterResult<()> {
        if self.courses.iter().any(|c| c.code == course.code) {
            return Err(RosterError::exists(RecordKind::Course, &course.code));
        }
        if let Some(missing) = course
            .enrolled_students
            .iter()
            .find(|id| self.student(id).is_err())
        {
            return Err(RosterError::not_found(RecordKind::Student, missing));
        }
        for (i, grant) in course.server_grants.iter().enumerate() {
            if course.server_grants[..i]
                .iter()
                .any(|g| g.matches_server(&grant.server_name))
            {
                return Err(RosterError::exists(
                    RecordKind::Grant,
                    format!("{}/{}", course.code, grant.server_name),
                ));
            }
        }
        debug!(course = %course.code, status = %course.status, "Course added");
        self.courses.push(course);
        Ok(())
    }

    pub fn update_course(&mut self, code: &str, update: CourseUpdate) -> RosterResult<&Course> {
        let title = match update.title {
            Some(title) if title.trim().is_empty() => {
                return Err(RosterError::invalid("course title cannot be empty"));
            }
            Some(title) => Some(title.trim().to_string()),
            None => None,
        };

        let course = self.course_mut(code)?;
        if let Some(title) = title {
            course.title = title;
        }
        if let Some(status) = update.status {
            course.status = status;
        }
        debug!(course = %course.code, status = %course.status, "Course updated");
        Ok(course)
    }

    pub fn remove_course(&mut self, code: &str) -> RosterResult<Course> {
        let index = self
            .courses
            .iter()
            .position(|c| c.code == code)
            .ok_or_else(|| RosterError::not_found(RecordKind::Course, code))?;
        let removed = self.courses.remove(index);
        info!(course = %removed.code, "Course removed");
        Ok(removed)
    }

    pub fn enroll(&mut self, code: &str, student_id: &StudentId) -> RosterResult<()> {
        self.student(student_id)?;
        let course = self.course_mut(code)?;
        if !course.enrolled_students.insert(student_id.clone()) {
            return Err(RosterError::exists(
                RecordKind::Enrollment,
                format!("{}/{}", code, student_id),
            ));
        }
        debug!(course = %code, student_id = %student_id, "Student enrolled");
        Ok(())
    }

    pub fn unenroll(&mut self, code: &str, student_id: &StudentId) -> RosterResult<()> {
        let course = self.course_mut(code)?;
        if !course.enrolled_students.remove(student_id) {
            return Err(RosterError::not_found(
                RecordKind::Enrollment,
                format!("{}/{}", code, student_id),
            ));
        }
        debug!(course = %code, student_id = %student_id, "Student unenrolled");
        Ok(())
    }

    pub fn add_grant(&mut self, code: &str, grant: GrantEntry) -> RosterResult<()> {
        let course = self.course_mut(code)?;
        if course.grant(&grant.server_name).is_some() {
            return Err(RosterError::exists(
                RecordKind::Grant,
                format!("{}/{}", code, grant.server_name),
            ));
        }
        debug!(course = %code, server = %grant.server_name, "Grant added");
        course.server_grants.push(grant);
        Ok(())
    }

    /// Replace the allowed service set of an existing grant
    pub fn update_grant(
        &mut self,
        code: &str,
        server_name: &str,
        allowed_services: BTreeSet<String>,
    ) -> RosterResult<&GrantEntry> {
        let replacement = GrantEntry::new(server_name, allowed_services)?;
        let course = self.course_mut(code)?;
        let grant = course
            .server_grants
            .iter_mut()
            .find(|g| g.matches_server(server_name))
            .ok_or_else(|| {
                RosterError::not_found(RecordKind::Grant, format!("{}/{}", code, server_name))
            })?;
        grant.allowed_services = replacement.allowed_services;
        debug!(course = %code, server = %grant.server_name, "Grant updated");
        Ok(grant)
    }

    pub fn remove_grant(&mut self, code: &str, server_name: &str) -> RosterResult<GrantEntry> {
        let course = self.course_mut(code)?;
        let index = course
            .server_grants
            .iter()
            .position(|g| g.matches_server(server_name))
            .ok_or_else(|| {
                RosterError::not_found(RecordKind::Grant, format!("{}/{}", code, server_name))
            })?;
        let removed = course.server_grants.remove(index);
        debug!(course = %code, server = %removed.server_name, "Grant removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CourseStatus, Protocol};
    use labgate_util::MacAddress;
    use std::net::Ipv4Addr;

    fn sid(code: &str) -> StudentId {
        StudentId::parse(code).unwrap()
    }

    fn student(code: &str) -> Student {
        Student::new(sid(code), format!("Student {}", code), MacAddress::new([0, 0, 0, 0, 0, 1]))
            .unwrap()
    }

    fn server(name: &str) -> Server {
        Server::new(
            name,
            Ipv4Addr::new(10, 0, 0, 3),
            vec![Service::new("ssh", Protocol::Tcp, 22).unwrap()],
        )
        .unwrap()
    }

    fn test_roster() -> Roster {
        let mut roster = Roster::new();
        roster.add_student(student("1001")).unwrap();
        roster.add_student(student("1002")).unwrap();
        roster.add_server(server("db1")).unwrap();
        roster.add_server(server("web1")).unwrap();

        for code in ["CS101", "CS102"] {
            roster
                .add_course(Course::new(code, "Networks", CourseStatus::Active).unwrap())
                .unwrap();
            roster.enroll(code, &sid("1001")).unwrap();
            roster
                .add_grant(code, GrantEntry::new("db1", ["ssh"]).unwrap())
                .unwrap();
            roster
                .add_grant(code, GrantEntry::new("web1", ["ssh"]).unwrap())
                .unwrap();
        }
        roster
    }

    #[test]
    fn duplicate_keys_fail_without_mutation() {
        let mut roster = test_roster();
        let before = roster.clone();

        assert!(matches!(
            roster.add_student(student("1001")),
            Err(RosterError::AlreadyExists { kind: RecordKind::Student, .. })
        ));
        assert!(matches!(
            roster.add_server(server("DB1")),
            Err(RosterError::AlreadyExists { kind: RecordKind::Server, .. })
        ));
        assert!(matches!(
            roster.add_course(Course::new("CS101", "Dup", CourseStatus::Inactive).unwrap()),
            Err(RosterError::AlreadyExists { kind: RecordKind::Course, .. })
        ));

        assert_eq!(roster, before);
    }

    #[test]
    fn remove_student_cascades_into_courses() {
        let mut roster = test_roster();

        let affected = roster.remove_student(&sid("1001")).unwrap();
        assert_eq!(affected, vec!["CS101".to_string(), "CS102".to_string()]);

        assert!(roster.student(&sid("1001")).is_err());
        assert!(roster
            .courses()
            .iter()
            .all(|c| !c.is_enrolled(&sid("1001"))));
    }

    #[test]
    fn remove_server_strips_all_grants() {
        let mut roster = test_roster();

        let affected = roster.remove_server("DB1").unwrap();
        assert_eq!(affected.len(), 2);
        assert!(roster
            .courses()
            .iter()
            .all(|c| c.server_grants.iter().all(|g| !g.matches_server("db1"))));
        // Other grants untouched
        assert!(roster.course("CS101").unwrap().grant("web1").is_some());
    }

    #[test]
    fn lookups_report_not_found() {
        let mut roster = test_roster();

        assert!(matches!(
            roster.remove_student(&sid("9999")),
            Err(RosterError::NotFound { kind: RecordKind::Student, .. })
        ));
        assert!(matches!(
            roster.server("nope"),
            Err(RosterError::NotFound { kind: RecordKind::Server, .. })
        ));
        assert!(matches!(
            roster.remove_grant("CS101", "nope"),
            Err(RosterError::NotFound { kind: RecordKind::Grant, .. })
        ));
    }

    #[test]
    fn enroll_requires_known_student() {
        let mut roster = test_roster();

        assert!(matches!(
            roster.enroll("CS101", &sid("4242")),
            Err(RosterError::NotFound { kind: RecordKind::Student, .. })
        ));
        assert!(matches!(
            roster.enroll("CS101", &sid("1001")),
            Err(RosterError::AlreadyExists { kind: RecordKind::Enrollment, .. })
        ));

        roster.enroll("CS101", &sid("1002")).unwrap();
        roster.unenroll("CS101", &sid("1002")).unwrap();
        assert!(matches!(
            roster.unenroll("CS101", &sid("1002")),
            Err(RosterError::NotFound { kind: RecordKind::Enrollment, .. })
        ));
    }

    #[test]
    fn add_course_rejects_dangling_enrollment() {
        let mut roster = test_roster();
        let mut course = Course::new("CS200", "Security", CourseStatus::Active).unwrap();
        course.enrolled_students.insert(sid("5555"));

        assert!(roster.add_course(course).is_err());
        assert!(roster.course("CS200").is_err());
    }

    #[test]
    fn update_records() {
        let mut roster = test_roster();

        let updated = roster
            .update_student(
                &sid("1002"),
                StudentUpdate {
                    display_name: Some("Ana".into()),
                    hardware_address: None,
                },
            )
            .unwrap();
        assert_eq!(updated.display_name, "Ana");

        assert!(roster
            .update_student(
                &sid("1002"),
                StudentUpdate {
                    display_name: Some(" ".into()),
                    hardware_address: None,
                },
            )
            .is_err());

        roster
            .update_service(
                "db1",
                "SSH",
                ServiceUpdate {
                    protocol: None,
                    port: Some(2222),
                },
            )
            .unwrap();
        assert_eq!(roster.server("db1").unwrap().service("ssh").unwrap().port, 2222);

        roster
            .update_course(
                "CS102",
                CourseUpdate {
                    title: None,
                    status: Some(CourseStatus::Completed),
                },
            )
            .unwrap();
        assert_eq!(roster.course("CS102").unwrap().status, CourseStatus::Completed);

        let services: BTreeSet<String> = ["ssh".to_string(), "web".to_string()].into();
        let grant = roster.update_grant("CS101", "DB1", services).unwrap();
        assert!(grant.allows("web"));
    }

    #[test]
    fn service_lifecycle() {
        let mut roster = test_roster();

        roster
            .add_service("db1", Service::new("web", Protocol::Tcp, 80).unwrap())
            .unwrap();
        assert!(matches!(
            roster.add_service("db1", Service::new("WEB", Protocol::Tcp, 8080).unwrap()),
            Err(RosterError::AlreadyExists { kind: RecordKind::Service, .. })
        ));

        let removed = roster.remove_service("db1", "web").unwrap();
        assert_eq!(removed.port, 80);
        assert!(roster.remove_service("db1", "web").is_err());
    }
}
