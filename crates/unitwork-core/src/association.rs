//! Static association metadata.
//!
//! Associations describe edges of the entity graph and how operations
//! cascade across them:
//!
//! - [`AssociationKind`] - the shape of the edge (to-one / to-many)
//! - [`CascadeStyle`] - which operations propagate over the edge
//! - [`AssociationInfo`] - per-edge metadata built with const methods
//! - [`LinkTableInfo`] - join-table description for many-to-many edges
//!
//! ```ignore
//! static ASSOCIATIONS: [AssociationInfo; 2] = [
//!     AssociationInfo::new("author", "authors", AssociationKind::ManyToOne)
//!         .local_key("author_id"),
//!     AssociationInfo::new("chapters", "chapters", AssociationKind::OneToMany)
//!         .remote_key("book_id")
//!         .cascade(CascadeStyle::All)
//!         .orphan_removal(),
//! ];
//! ```

/// The shape of an association edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationKind {
    /// One row relates to exactly one row of the target.
    OneToOne,
    /// Many rows carry a foreign key to one target row.
    #[default]
    ManyToOne,
    /// One row owns a collection of target rows keyed back to it.
    OneToMany,
    /// Rows relate through a link table.
    ManyToMany,
}

impl AssociationKind {
    /// Whether this edge targets a collection.
    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        matches!(self, AssociationKind::OneToMany | AssociationKind::ManyToMany)
    }
}

/// An operation that can propagate across association edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOp {
    /// Make transient instances managed.
    Persist,
    /// Copy detached state onto managed instances.
    Merge,
    /// Schedule managed instances for deletion.
    Remove,
    /// Re-read state from storage.
    Refresh,
}

impl CascadeOp {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CascadeOp::Persist => "persist",
            CascadeOp::Merge => "merge",
            CascadeOp::Remove => "remove",
            CascadeOp::Refresh => "refresh",
        }
    }
}

/// Cascade behavior configured on an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeStyle {
    /// Nothing propagates.
    #[default]
    None,
    /// Persist propagates.
    Persist,
    /// Merge propagates.
    Merge,
    /// Remove propagates.
    Remove,
    /// Refresh propagates.
    Refresh,
    /// Every operation propagates.
    All,
}

impl CascadeStyle {
    /// Whether `op` propagates over an edge with this style.
    #[must_use]
    pub const fn cascades(&self, op: CascadeOp) -> bool {
        match self {
            CascadeStyle::None => false,
            CascadeStyle::All => true,
            CascadeStyle::Persist => matches!(op, CascadeOp::Persist),
            CascadeStyle::Merge => matches!(op, CascadeOp::Merge),
            CascadeStyle::Remove => matches!(op, CascadeOp::Remove),
            CascadeStyle::Refresh => matches!(op, CascadeOp::Refresh),
        }
    }
}

/// Join-table description for a many-to-many association.
///
/// Link rows bind one key column per side; composite endpoint keys are not
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// Link table name.
    pub table: &'static str,
    /// Column referencing the owning side.
    pub local_column: &'static str,
    /// Column referencing the target side.
    pub remote_column: &'static str,
}

impl LinkTableInfo {
    /// Create link-table metadata.
    #[must_use]
    pub const fn new(
        table: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self {
            table,
            local_column,
            remote_column,
        }
    }
}

/// Metadata for one association edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationInfo {
    /// Field name on the owning entity.
    pub name: &'static str,
    /// Table of the target entity.
    pub target_table: &'static str,
    /// Edge shape.
    pub kind: AssociationKind,
    /// Which operations propagate.
    pub cascade: CascadeStyle,
    /// Delete target rows disassociated from a to-many collection.
    pub orphan_removal: bool,
    /// Foreign key column on this table (to-one edges).
    pub local_key: Option<&'static str>,
    /// Foreign key column on the target table (one-to-many edges).
    pub remote_key: Option<&'static str>,
    /// Link table (many-to-many edges).
    pub link_table: Option<LinkTableInfo>,
    /// Field on the target entity pointing back here, if bidirectional.
    pub back_populates: Option<&'static str>,
}

impl AssociationInfo {
    /// Create association metadata with defaults (no cascade, no keys).
    #[must_use]
    pub const fn new(
        name: &'static str,
        target_table: &'static str,
        kind: AssociationKind,
    ) -> Self {
        Self {
            name,
            target_table,
            kind,
            cascade: CascadeStyle::None,
            orphan_removal: false,
            local_key: None,
            remote_key: None,
            link_table: None,
            back_populates: None,
        }
    }

    /// Set the cascade style.
    #[must_use]
    pub const fn cascade(mut self, style: CascadeStyle) -> Self {
        self.cascade = style;
        self
    }

    /// Enable orphan removal (to-many edges only).
    #[must_use]
    pub const fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    /// Set the foreign key column on this table.
    #[must_use]
    pub const fn local_key(mut self, column: &'static str) -> Self {
        self.local_key = Some(column);
        self
    }

    /// Set the foreign key column on the target table.
    #[must_use]
    pub const fn remote_key(mut self, column: &'static str) -> Self {
        self.remote_key = Some(column);
        self
    }

    /// Set the link table.
    #[must_use]
    pub const fn link_table(mut self, link: LinkTableInfo) -> Self {
        self.link_table = Some(link);
        self
    }

    /// Name the inverse field on the target entity.
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }

    /// Whether `op` propagates over this edge.
    #[must_use]
    pub const fn cascades(&self, op: CascadeOp) -> bool {
        self.cascade.cascades(op)
    }

    /// Whether disassociated children of this edge are deleted.
    ///
    /// Only meaningful on to-many edges.
    #[must_use]
    pub const fn removes_orphans(&self) -> bool {
        self.orphan_removal && self.kind.is_to_many()
    }
}

/// Find an association by field name in a metadata table.
#[must_use]
pub fn find_association(
    associations: &'static [AssociationInfo],
    name: &str,
) -> Option<&'static AssociationInfo> {
    associations.iter().find(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    static ASSOCIATIONS: [AssociationInfo; 3] = [
        AssociationInfo::new("author", "authors", AssociationKind::ManyToOne)
            .local_key("author_id")
            .cascade(CascadeStyle::Persist),
        AssociationInfo::new("chapters", "chapters", AssociationKind::OneToMany)
            .remote_key("book_id")
            .cascade(CascadeStyle::All)
            .orphan_removal(),
        AssociationInfo::new("tags", "tags", AssociationKind::ManyToMany)
            .link_table(LinkTableInfo::new("book_tags", "book_id", "tag_id")),
    ];

    #[test]
    fn test_cascade_style_matrix() {
        assert!(CascadeStyle::All.cascades(CascadeOp::Remove));
        assert!(CascadeStyle::Persist.cascades(CascadeOp::Persist));
        assert!(!CascadeStyle::Persist.cascades(CascadeOp::Remove));
        assert!(!CascadeStyle::None.cascades(CascadeOp::Persist));
        assert!(CascadeStyle::Refresh.cascades(CascadeOp::Refresh));
    }

    #[test]
    fn test_orphan_removal_requires_to_many() {
        assert!(ASSOCIATIONS[1].removes_orphans());
        let to_one = AssociationInfo::new("author", "authors", AssociationKind::ManyToOne)
            .orphan_removal();
        assert!(!to_one.removes_orphans());
    }

    #[test]
    fn test_const_builders() {
        assert_eq!(ASSOCIATIONS[0].local_key, Some("author_id"));
        assert_eq!(ASSOCIATIONS[1].remote_key, Some("book_id"));
        let link = ASSOCIATIONS[2].link_table.unwrap();
        assert_eq!(link.table, "book_tags");
        assert_eq!(link.local_column, "book_id");
    }

    #[test]
    fn test_find_association() {
        assert!(find_association(&ASSOCIATIONS, "chapters").is_some());
        assert!(find_association(&ASSOCIATIONS, "missing").is_none());
    }

    #[test]
    fn test_kind_shape() {
        assert!(AssociationKind::OneToMany.is_to_many());
        assert!(AssociationKind::ManyToMany.is_to_many());
        assert!(!AssociationKind::ManyToOne.is_to_many());
    }
}
