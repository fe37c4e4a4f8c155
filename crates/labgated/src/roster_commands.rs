//! Roster queries and edits driven by IPC commands

use labgate_api::{Command, ResponsePayload};
use labgate_roster::{
    Course, GrantEntry, Roster, RosterError, RosterResult, Server, Service, Student,
};

/// Answer a read-only roster command
pub fn query(roster: &Roster, command: &Command) -> RosterResult<ResponsePayload> {
    let payload = match command {
        Command::ListStudents => ResponsePayload::Students {
            students: roster.students().to_vec(),
        },
        Command::GetStudent { student_id } => ResponsePayload::Student {
            student: roster.student(student_id)?.clone(),
        },
        Command::ListServers => ResponsePayload::Servers {
            servers: roster.servers().to_vec(),
        },
        Command::GetServer { name } => ResponsePayload::Server {
            server: roster.server(name)?.clone(),
        },
        Command::ListCourses => ResponsePayload::Courses {
            courses: roster.courses().to_vec(),
        },
        Command::GetCourse { code } => ResponsePayload::Course {
            course: roster.course(code)?.clone(),
        },
        other => return Err(not_a_roster_command(other)),
    };
    Ok(payload)
}

/// Apply a roster edit. On error the roster is unchanged.
pub fn edit(roster: &mut Roster, command: Command) -> RosterResult<ResponsePayload> {
    let payload = match command {
        Command::AddStudent { student } => {
            let student = checked_student(student)?;
            roster.add_student(student.clone())?;
            ResponsePayload::Student { student }
        }
        Command::UpdateStudent { student_id, update } => ResponsePayload::Student {
            student: roster.update_student(&student_id, update)?.clone(),
        },
        Command::RemoveStudent { student_id } => ResponsePayload::Removed {
            affected_courses: roster.remove_student(&student_id)?,
        },

        Command::AddServer { server } => {
            let server = checked_server(server)?;
            roster.add_server(server.clone())?;
            ResponsePayload::Server { server }
        }
        Command::UpdateServer { name, update } => ResponsePayload::Server {
            server: roster.update_server(&name, update)?.clone(),
        },
        Command::RemoveServer { name } => ResponsePayload::Removed {
            affected_courses: roster.remove_server(&name)?,
        },
        Command::AddService {
            server_name,
            service,
        } => {
            let service = checked_service(service)?;
            roster.add_service(&server_name, service.clone())?;
            ResponsePayload::Service { service }
        }
        Command::UpdateService {
            server_name,
            service_name,
            update,
        } => ResponsePayload::Service {
            service: roster
                .update_service(&server_name, &service_name, update)?
                .clone(),
        },
        Command::RemoveService {
            server_name,
            service_name,
        } => {
            roster.remove_service(&server_name, &service_name)?;
            ResponsePayload::Done
        }

        Command::AddCourse { course } => {
            let course = checked_course(course)?;
            roster.add_course(course.clone())?;
            ResponsePayload::Course { course }
        }
        Command::UpdateCourse { code, update } => ResponsePayload::Course {
            course: roster.update_course(&code, update)?.clone(),
        },
        Command::RemoveCourse { code } => {
            roster.remove_course(&code)?;
            ResponsePayload::Done
        }
        Command::Enroll { code, student_id } => {
            roster.enroll(&code, &student_id)?;
            ResponsePayload::Done
        }
        Command::Unenroll { code, student_id } => {
            roster.unenroll(&code, &student_id)?;
            ResponsePayload::Done
        }
        Command::AddGrant { code, grant } => {
            let grant = checked_grant(grant)?;
            roster.add_grant(&code, grant.clone())?;
            ResponsePayload::Grant { grant }
        }
        Command::UpdateGrant {
            code,
            server_name,
            allowed_services,
        } => ResponsePayload::Grant {
            grant: roster
                .update_grant(&code, &server_name, allowed_services)?
                .clone(),
        },
        Command::RemoveGrant { code, server_name } => {
            roster.remove_grant(&code, &server_name)?;
            ResponsePayload::Done
        }

        other => return Err(not_a_roster_command(&other)),
    };
    Ok(payload)
}

fn not_a_roster_command(command: &Command) -> RosterError {
    RosterError::invalid(format!("not a roster command: {:?}", command))
}

// Records arriving over the wire skip their constructors, so run them
// through again.

fn checked_student(student: Student) -> RosterResult<Student> {
    Student::new(student.id, student.display_name, student.hardware_address)
}

fn checked_service(service: Service) -> RosterResult<Service> {
    Service::new(service.name, service.protocol, service.port)
}

fn checked_server(server: Server) -> RosterResult<Server> {
    let services = server
        .services
        .into_iter()
        .map(checked_service)
        .collect::<RosterResult<Vec<_>>>()?;
    Server::new(server.name, server.address, services)
}

fn checked_grant(grant: GrantEntry) -> RosterResult<GrantEntry> {
    GrantEntry::new(grant.server_name, grant.allowed_services)
}

fn checked_course(course: Course) -> RosterResult<Course> {
    let mut checked = Course::new(course.code, course.title, course.status)?;
    checked.enrolled_students = course.enrolled_students;
    checked.server_grants = course
        .server_grants
        .into_iter()
        .map(checked_grant)
        .collect::<RosterResult<Vec<_>>>()?;
    Ok(checked)
}
