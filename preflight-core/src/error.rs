use thiserror::Error;

/// A declaration the engine cannot validate because required data is
/// missing.
///
/// Input errors never abort a run; the driver converts them into a
/// per-entity `critical` outcome so the rest of the batch still gets
/// validated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("{entity}: required field `{field}` is empty")]
    MissingField { entity: String, field: &'static str },
}
