//! Workspace Comparator (C10)

pub mod comparator;
pub mod repository;

pub use comparator::{
    compare, ComparisonResult, ComparisonType, Difference, DifferenceCategory, Severity, StateMetadata,
};
pub use repository::{Workspace, WorkspaceComparisonRow, WorkspaceRepository, WorkspaceVariable};
