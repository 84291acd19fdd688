//! Declarative description of every table the store must contain.
//!
//! The catalog is the single source of truth for the desired schema: the
//! initializer renders `CREATE TABLE` statements from it and the migrator
//! diffs it against what is physically present. Fields carry the release in
//! which they first appeared so older stores can be patched forward.

use serde::{Serialize, Serializer};
use std::fmt;

/// Release number of the current catalog.
pub const CATALOG_RELEASE: u32 = 3;

/// Title shown on the wall when no custom title has been set.
pub const DEFAULT_DISPLAY_TITLE: &str = "What’s on Tap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Beverage,
    DisplaySettings,
    StoredImage,
}

impl Entity {
    pub const ALL: [Entity; 3] = [Entity::StoredImage, Entity::Beverage, Entity::DisplaySettings];

    pub fn table(self) -> &'static str {
        schema_of(self).table
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.table())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(&'static str),
}

impl DefaultValue {
    /// Render as a SQL literal usable in `DEFAULT` clauses.
    pub fn sql_literal(&self) -> String {
        match self {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub primary_key: bool,
    /// Table referenced by this column, if it is an image reference.
    pub references: Option<&'static str>,
    /// Release that introduced the field.
    pub since: u32,
}

impl FieldDef {
    const fn column(name: &'static str, ty: ColumnType, since: u32) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: None,
            primary_key: false,
            references: None,
            since,
        }
    }

    const fn id(since: u32) -> Self {
        Self {
            name: "id",
            ty: ColumnType::Integer,
            nullable: false,
            default: None,
            primary_key: true,
            references: None,
            since,
        }
    }

    const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    const fn referencing(mut self, table: &'static str) -> Self {
        self.references = Some(table);
        self
    }

    /// Column definition used when the table is created from scratch.
    pub fn create_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.ty.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
            return sql;
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        self.push_tail(&mut sql);
        sql
    }

    /// Column definition used by `ALTER TABLE .. ADD COLUMN`. Always nullable,
    /// since rows that predate the column have no value for it.
    pub fn add_column_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.ty.sql());
        self.push_tail(&mut sql);
        sql
    }

    fn push_tail(&self, sql: &mut String) {
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.sql_literal());
        }
        if let Some(table) = self.references {
            sql.push_str(" REFERENCES ");
            sql.push_str(table);
            sql.push_str("(id)");
        }
    }
}

#[derive(Debug)]
pub struct EntitySchema {
    pub entity: Entity,
    pub table: &'static str,
    /// Release that introduced the table itself.
    pub since: u32,
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(FieldDef::create_sql)
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.table, columns
        )
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields added after the table first shipped; an older store may lack them.
    pub fn retrofit_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(move |f| f.since > self.since)
    }
}

use ColumnType::{Blob, Integer, Real, Text};

const BEER_FIELDS: &[FieldDef] = &[
    FieldDef::id(1),
    FieldDef::column("tap_number", Integer, 1).required(),
    FieldDef::column("name", Text, 1).required(),
    FieldDef::column("style", Text, 1),
    FieldDef::column("abv", Real, 1),
    FieldDef::column("ibu", Integer, 1),
    FieldDef::column("ebc", Integer, 1),
    FieldDef::column("og", Real, 2),
    FieldDef::column("sg", Real, 2),
    FieldDef::column("image_id", Integer, 3).referencing("storedimage"),
];

const DISPLAY_SETTINGS_FIELDS: &[FieldDef] = &[
    FieldDef::id(2),
    FieldDef::column("title", Text, 2).with_default(DefaultValue::Text(DEFAULT_DISPLAY_TITLE)),
    FieldDef::column("logo_image_id", Integer, 3).referencing("storedimage"),
];

const STORED_IMAGE_FIELDS: &[FieldDef] = &[
    FieldDef::id(3),
    FieldDef::column("kind", Text, 3),
    FieldDef::column("content_type", Text, 3).required(),
    FieldDef::column("data", Blob, 3).required(),
    FieldDef::column("created_at", Text, 3),
];

pub const CATALOG: &[EntitySchema] = &[
    EntitySchema {
        entity: Entity::StoredImage,
        table: "storedimage",
        since: 3,
        fields: STORED_IMAGE_FIELDS,
    },
    EntitySchema {
        entity: Entity::Beverage,
        table: "beer",
        since: 1,
        fields: BEER_FIELDS,
    },
    EntitySchema {
        entity: Entity::DisplaySettings,
        table: "displaysettings",
        since: 2,
        fields: DISPLAY_SETTINGS_FIELDS,
    },
];

pub fn schema_of(entity: Entity) -> &'static EntitySchema {
    match entity {
        Entity::StoredImage => &CATALOG[0],
        Entity::Beverage => &CATALOG[1],
        Entity::DisplaySettings => &CATALOG[2],
    }
}

/// Ordered field list for an entity.
pub fn describe(entity: Entity) -> &'static [FieldDef] {
    schema_of(entity).fields
}
