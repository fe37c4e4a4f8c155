//! Authorization against the roster

use labgate_roster::Roster;
use labgate_util::StudentId;

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    /// Granted through the named course
    Granted { course: String },
    Denied {
        student_id: StudentId,
        server_name: String,
        service_name: String,
    },
}

impl AuthzDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthzDecision::Granted { .. })
    }
}

/// Decide whether a student may reach a service on a server.
///
/// Access is the union over every ACTIVE course the student is enrolled
/// in; the first course (in roster order) whose grant for the server lists
/// the service wins. Server and service names match case-insensitively.
/// Whether the server or service still exist is not checked here.
pub fn authorize(
    roster: &Roster,
    student_id: &StudentId,
    server_name: &str,
    service_name: &str,
) -> AuthzDecision {
    let granting = roster
        .courses()
        .iter()
        .filter(|course| course.is_active() && course.is_enrolled(student_id))
        .find(|course| {
            course
                .grant(server_name)
                .is_some_and(|grant| grant.allows(service_name))
        });

    match granting {
        Some(course) => AuthzDecision::Granted {
            course: course.code.clone(),
        },
        None => AuthzDecision::Denied {
            student_id: student_id.clone(),
            server_name: server_name.to_string(),
            service_name: service_name.to_string(),
        },
    }
}

pub fn is_authorized(
    roster: &Roster,
    student_id: &StudentId,
    server_name: &str,
    service_name: &str,
) -> bool {
    authorize(roster, student_id, server_name, service_name).is_granted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_roster::{Course, CourseStatus, GrantEntry, Protocol, Server, Service, Student};
    use std::net::Ipv4Addr;

    fn id(n: u64) -> StudentId {
        StudentId::from(n)
    }

    fn roster() -> Roster {
        let mut roster = Roster::new();
        for (n, mac) in [(1001, "00:00:00:00:00:01"), (1002, "00:00:00:00:00:02")] {
            roster
                .add_student(Student::new(id(n), format!("Student {}", n), mac.parse().unwrap()).unwrap())
                .unwrap();
        }
        roster
            .add_server(
                Server::new(
                    "db1",
                    Ipv4Addr::new(10, 0, 0, 3),
                    vec![
                        Service::new("ssh", Protocol::Tcp, 22).unwrap(),
                        Service::new("web", Protocol::Tcp, 80).unwrap(),
                    ],
                )
                .unwrap(),
            )
            .unwrap();

        for (code, status, services) in [
            ("CS101", CourseStatus::Active, vec!["ssh"]),
            ("CS050", CourseStatus::Completed, vec!["ssh", "web"]),
            ("CS060", CourseStatus::Inactive, vec!["web"]),
        ] {
            roster.add_course(Course::new(code, "Course", status).unwrap()).unwrap();
            roster.add_grant(code, GrantEntry::new("db1", services).unwrap()).unwrap();
        }
        roster
    }

    #[test]
    fn enrolled_in_active_course_is_granted() {
        let mut roster = roster();
        roster.enroll("CS101", &id(1001)).unwrap();

        assert_eq!(
            authorize(&roster, &id(1001), "db1", "ssh"),
            AuthzDecision::Granted { course: "CS101".into() }
        );
        assert!(is_authorized(&roster, &id(1001), "DB1", "SSH"));
        assert!(!is_authorized(&roster, &id(1001), "db1", "web"));
    }

    #[test]
    fn not_enrolled_is_denied() {
        let roster = roster();
        assert_eq!(
            authorize(&roster, &id(1002), "db1", "ssh"),
            AuthzDecision::Denied {
                student_id: id(1002),
                server_name: "db1".into(),
                service_name: "ssh".into(),
            }
        );
    }

    #[test]
    fn inactive_and_completed_courses_never_grant() {
        let mut roster = roster();
        roster.enroll("CS050", &id(1002)).unwrap();
        roster.enroll("CS060", &id(1002)).unwrap();

        for service in ["ssh", "web"] {
            assert!(!is_authorized(&roster, &id(1002), "db1", service));
        }
    }

    #[test]
    fn any_active_course_grants() {
        let mut roster = roster();
        roster.add_course(Course::new("CS200", "Web", CourseStatus::Active).unwrap()).unwrap();
        roster.add_grant("CS200", GrantEntry::new("db1", ["web"]).unwrap()).unwrap();
        roster.enroll("CS101", &id(1001)).unwrap();
        roster.enroll("CS200", &id(1001)).unwrap();

        assert!(is_authorized(&roster, &id(1001), "db1", "ssh"));
        assert_eq!(
            authorize(&roster, &id(1001), "db1", "web"),
            AuthzDecision::Granted { course: "CS200".into() }
        );
    }

    #[test]
    fn server_removal_revokes_access() {
        let mut roster = roster();
        roster.enroll("CS101", &id(1001)).unwrap();
        roster.remove_server("db1").unwrap();

        assert!(!is_authorized(&roster, &id(1001), "db1", "ssh"));
    }
}
