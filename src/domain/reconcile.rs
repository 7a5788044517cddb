//! Merging mutation responses back into a screen's cached collection.
//!
//! Mutation endpoints answer with only part of an entity. `reconcile` takes
//! the response as the new entry and restores the pinned fields from the
//! cached entry it replaces.

use crate::domain::models::{Task, WorkGroup, Workplace};
use std::convert::Infallible;

pub trait CachedEntity: Clone {
    type Field: Copy;

    fn id(&self) -> i64;

    /// Restores `field` on `self` (the mutation response) from `cached`.
    /// A value present in `cached` wins; otherwise whatever `self` carries is
    /// kept, and an absent value stays at its default.
    fn pin(&mut self, field: Self::Field, cached: &Self);
}

/// Replaces the entry with `updated.id()`; returns the list unchanged when no
/// entry matches.
pub fn reconcile<E: CachedEntity>(cached: &[E], updated: &E, pinned: &[E::Field]) -> Vec<E> {
    cached
        .iter()
        .map(|entry| {
            if entry.id() != updated.id() {
                return entry.clone();
            }
            let mut merged = updated.clone();
            for field in pinned {
                merged.pin(*field, entry);
            }
            merged
        })
        .collect()
}

pub fn remove<E: CachedEntity>(cached: &[E], id: i64) -> Vec<E> {
    cached.iter().filter(|entry| entry.id() != id).cloned().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Content,
    DueDate,
    Status,
    Priority,
    AssignedUserId,
    AssignedWorkGroupId,
    CompletionDate,
    WorkplaceName,
    AssignedUser,
    AssignedWorkGroup,
    Workplace,
}

impl TaskField {
    /// Fields only the full task listing returns.
    pub const RELATIONAL: &'static [TaskField] = &[
        TaskField::Workplace,
        TaskField::WorkplaceName,
        TaskField::AssignedUser,
        TaskField::AssignedWorkGroup,
    ];

    /// Everything except `attachments`, for attachment delete and refresh.
    pub const ALL_BUT_ATTACHMENTS: &'static [TaskField] = &[
        TaskField::Content,
        TaskField::DueDate,
        TaskField::Status,
        TaskField::Priority,
        TaskField::AssignedUserId,
        TaskField::AssignedWorkGroupId,
        TaskField::CompletionDate,
        TaskField::Workplace,
        TaskField::WorkplaceName,
        TaskField::AssignedUser,
        TaskField::AssignedWorkGroup,
    ];
}

fn pin_option<T: Clone>(target: &mut Option<T>, cached: &Option<T>) {
    if cached.is_some() {
        *target = cached.clone();
    }
}

fn pin_string(target: &mut String, cached: &str) {
    if !cached.is_empty() {
        *target = cached.to_string();
    }
}

impl CachedEntity for Task {
    type Field = TaskField;

    fn id(&self) -> i64 {
        self.id
    }

    fn pin(&mut self, field: TaskField, cached: &Task) {
        match field {
            TaskField::Content => pin_string(&mut self.content, &cached.content),
            TaskField::DueDate => pin_option(&mut self.due_date, &cached.due_date),
            TaskField::Status => pin_string(&mut self.status, &cached.status),
            TaskField::Priority => pin_string(&mut self.priority, &cached.priority),
            TaskField::AssignedUserId => {
                pin_option(&mut self.assigned_user_id, &cached.assigned_user_id)
            }
            TaskField::AssignedWorkGroupId => {
                pin_option(&mut self.assigned_work_group_id, &cached.assigned_work_group_id)
            }
            TaskField::CompletionDate => {
                pin_option(&mut self.completion_date, &cached.completion_date)
            }
            TaskField::WorkplaceName => {
                if !cached.workplace_name.is_empty() {
                    self.workplace_name = cached.workplace_name.clone();
                } else if let Some(workplace) = &self.workplace {
                    self.workplace_name = workplace.name.clone();
                }
            }
            TaskField::AssignedUser => pin_option(&mut self.assigned_user, &cached.assigned_user),
            TaskField::AssignedWorkGroup => {
                pin_option(&mut self.assigned_work_group, &cached.assigned_work_group)
            }
            TaskField::Workplace => pin_option(&mut self.workplace, &cached.workplace),
        }
    }
}

// Workplaces and work groups are only ever replaced wholesale or removed.
impl CachedEntity for Workplace {
    type Field = Infallible;

    fn id(&self) -> i64 {
        self.id
    }

    fn pin(&mut self, field: Infallible, _cached: &Workplace) {
        match field {}
    }
}

impl CachedEntity for WorkGroup {
    type Field = Infallible;

    fn id(&self) -> i64 {
        self.id
    }

    fn pin(&mut self, field: Infallible, _cached: &WorkGroup) {
        match field {}
    }
}
