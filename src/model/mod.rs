pub use self::professor::{NewProfessor, Professor, ProfessorId};
pub use self::project::{Project, ProjectFields, ProjectId};

mod professor;
mod project;
