//! Conditional-write checks against the current generation/metageneration.

use crate::{
    models::object::ObjectVersion,
    services::version_store::{StorageError, StorageResult},
};

/// Any subset of the four generation/metageneration conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

impl Preconditions {
    /// Evaluate every supplied condition against `existing`, the current
    /// latest version (or `None` when the object is absent).
    ///
    /// Callers must hold the object's key lock across this check and the
    /// write it guards.
    pub fn check(&self, existing: Option<&ObjectVersion>) -> StorageResult<()> {
        match existing {
            None => {
                if let Some(expected) = self.if_generation_match {
                    if expected != 0 {
                        return Err(failed(format!(
                            "ifGenerationMatch={} but the object does not exist",
                            expected
                        )));
                    }
                }
                if let Some(expected) = self.if_metageneration_match {
                    return Err(failed(format!(
                        "ifMetagenerationMatch={} but the object does not exist",
                        expected
                    )));
                }
                Ok(())
            }
            Some(current) => {
                if let Some(expected) = self.if_generation_match {
                    if current.generation != expected {
                        return Err(failed(format!(
                            "ifGenerationMatch={} but current generation is {}",
                            expected, current.generation
                        )));
                    }
                }
                if let Some(rejected) = self.if_generation_not_match {
                    if current.generation == rejected {
                        return Err(failed(format!(
                            "ifGenerationNotMatch={} matches current generation",
                            rejected
                        )));
                    }
                }
                if let Some(expected) = self.if_metageneration_match {
                    if current.metageneration != expected {
                        return Err(failed(format!(
                            "ifMetagenerationMatch={} but current metageneration is {}",
                            expected, current.metageneration
                        )));
                    }
                }
                if let Some(rejected) = self.if_metageneration_not_match {
                    if current.metageneration == rejected {
                        return Err(failed(format!(
                            "ifMetagenerationNotMatch={} matches current metageneration",
                            rejected
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn failed(message: String) -> StorageError {
    StorageError::PreconditionFailed(message)
}
