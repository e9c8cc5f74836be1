use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ClassroomError, ClassroomResult};
use crate::models::{ClassId, CodeBuffer, CodeMessage, CodeResponse, Session, UserId};
use crate::store::{keys, SharedStore};
use crate::ws::broker::Broker;
use crate::ws::topics::Topic;

/// Last-write-wins code buffers per (class, owner).
///
/// The instructor's buffer fans out on `code.instructor.{cid}`; each student
/// buffer has its own topic `code.student.{cid}.{sid}`, watched by that student
/// and the instructor.
pub struct CodeService {
    store: SharedStore,
    broker: Arc<Broker>,
}

impl CodeService {
    pub fn new(store: SharedStore, broker: Arc<Broker>) -> Self {
        Self { store, broker }
    }

    pub fn share_instructor_code(&self, session: &Session, class_id: ClassId, code: &str, language: &str) -> ClassroomResult<CodeMessage> {
        if !session.is_instructor() {
            return Err(ClassroomError::Authorization(format!(
                "user {} is not an instructor of class {}",
                session.user_id, class_id
            )));
        }

        self.write(&keys::instructor_code(class_id), session.user_id, code, language)?;
        let msg = CodeMessage {
            class_id,
            user_id: session.user_id,
            username: session.display_name.clone(),
            code: code.to_string(),
            language: language.to_string(),
            instructor: true,
            edited_by_instructor: false,
        };
        self.broker.publish(&Topic::InstructorCode(class_id), &msg);
        Ok(msg)
    }

    pub fn share_student_code(&self, session: &Session, class_id: ClassId, code: &str, language: &str) -> ClassroomResult<CodeMessage> {
        if session.is_instructor() {
            return Err(ClassroomError::Authorization(format!(
                "instructor {} cannot share a student buffer",
                session.user_id
            )));
        }

        self.write_student(class_id, session.user_id, code, language)?;
        let msg = CodeMessage {
            class_id,
            user_id: session.user_id,
            username: session.display_name.clone(),
            code: code.to_string(),
            language: language.to_string(),
            instructor: false,
            edited_by_instructor: false,
        };
        self.broker.publish(&Topic::StudentCode(class_id, session.user_id), &msg);
        Ok(msg)
    }

    /// Instructor overwrites a student's buffer. Ownership stays with the
    /// student; only the broadcast records who made the edit.
    pub fn edit_student_code_by_instructor(
        &self,
        session: &Session,
        class_id: ClassId,
        student_id: UserId,
        code: &str,
        language: &str,
    ) -> ClassroomResult<CodeMessage> {
        if !session.is_instructor() {
            return Err(ClassroomError::Authorization(format!(
                "user {} cannot edit student code",
                session.user_id
            )));
        }

        self.write_student(class_id, student_id, code, language)?;
        let msg = CodeMessage {
            class_id,
            user_id: student_id,
            username: session.display_name.clone(),
            code: code.to_string(),
            language: language.to_string(),
            instructor: true,
            edited_by_instructor: true,
        };
        info!("Instructor {} edited code of student {} in class {}", session.user_id, student_id, class_id);
        self.broker.publish(&Topic::StudentCode(class_id, student_id), &msg);
        Ok(msg)
    }

    pub fn get_instructor_code(&self, class_id: ClassId) -> CodeResponse {
        self.read(&keys::instructor_code(class_id))
    }

    pub fn get_student_code(&self, class_id: ClassId, student_id: UserId) -> CodeResponse {
        self.read(&keys::student_code(class_id, student_id))
    }

    /// Drop the instructor buffer and every student buffer of the class
    pub fn cleanup(&self, class_id: ClassId) -> usize {
        let index_key = keys::class_code_students(class_id);
        let students = self.store.smembers(&index_key);
        for student in &students {
            match student.parse::<UserId>() {
                Ok(id) => {
                    self.store.delete(&keys::student_code(class_id, id));
                }
                Err(_) => warn!("Ignoring malformed student id '{}' in {}", student, index_key),
            }
        }
        self.store.delete(&index_key);
        self.store.delete(&keys::instructor_code(class_id));
        info!("Code buffers of class {} cleaned up ({} student buffer(s))", class_id, students.len());
        students.len()
    }

    fn write_student(&self, class_id: ClassId, student_id: UserId, code: &str, language: &str) -> ClassroomResult<()> {
        self.write(&keys::student_code(class_id, student_id), student_id, code, language)?;
        self.store.sadd(&keys::class_code_students(class_id), &student_id.to_string());
        Ok(())
    }

    fn write(&self, key: &str, owner: UserId, code: &str, language: &str) -> ClassroomResult<()> {
        let buffer = CodeBuffer {
            user_id: owner,
            code: code.to_string(),
            language: language.to_string(),
            updated_at: Utc::now(),
        };
        self.store.set_json(key, &buffer)?;
        debug!("Stored code buffer {} ({} bytes)", key, code.len());
        Ok(())
    }

    fn read(&self, key: &str) -> CodeResponse {
        self.store
            .get_json::<CodeBuffer>(key)
            .map(CodeResponse::from)
            .unwrap_or_else(CodeResponse::empty)
    }
}
