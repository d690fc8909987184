//! Upsertable entity types.
//!
//! Each entity enumerates its mutable attributes in a static field table:
//! one typed setter (and getter) per canonical column. A column that is not in
//! the table never reaches storage, so adding an attribute is an explicit edit
//! here rather than whatever a source file happens to contain.

use crate::model::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
}

impl FieldKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Integer | FieldKind::Boolean => "INTEGER",
        }
    }
}

/// Rust types an entity attribute can have.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    fn from_value(value: &Value) -> Result<Option<Self>, String>;
    fn to_value(field: &Option<Self>) -> Value;
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Text;

    fn from_value(value: &Value) -> Result<Option<Self>, String> {
        Ok(value.as_text())
    }

    fn to_value(field: &Option<Self>) -> Value {
        field.clone().map(Value::Text).unwrap_or(Value::Null)
    }
}

impl FieldType for i64 {
    const KIND: FieldKind = FieldKind::Integer;

    fn from_value(value: &Value) -> Result<Option<Self>, String> {
        value.as_i64()
    }

    fn to_value(field: &Option<Self>) -> Value {
        field.map(Value::Int).unwrap_or(Value::Null)
    }
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn from_value(value: &Value) -> Result<Option<Self>, String> {
        value.as_bool()
    }

    fn to_value(field: &Option<Self>) -> Value {
        field.map(Value::Bool).unwrap_or(Value::Null)
    }
}

/// One entry of an entity's field-update table.
pub struct FieldSetter<E> {
    pub name: &'static str,
    pub kind: FieldKind,
    pub apply: fn(&mut E, &Value) -> Result<(), String>,
    pub read: fn(&E) -> Value,
}

macro_rules! field_table {
    ($entity:ty { $($field:ident: $ty:ty),+ $(,)? }) => {
        &[$(
            FieldSetter {
                name: stringify!($field),
                kind: <$ty as FieldType>::KIND,
                apply: |e: &mut $entity, v: &Value| {
                    e.$field = <$ty as FieldType>::from_value(v)?;
                    Ok(())
                },
                read: |e: &$entity| <$ty as FieldType>::to_value(&e.$field),
            },
        )+]
    };
}

pub trait Entity: Sized + std::fmt::Debug + 'static {
    /// Routing name (`department`).
    const NAME: &'static str;
    /// Destination table (`departments`).
    const TABLE: &'static str;
    const KEY_FIELD: &'static str;
    const KEY_KIND: FieldKind;

    /// A fresh, unsaved entity carrying only its business key.
    fn from_key(key: &str) -> Result<Self, String>;
    fn key(&self) -> Value;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn fields() -> &'static [FieldSetter<Self>];

    fn field(name: &str) -> Option<&'static FieldSetter<Self>> {
        Self::fields().iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Department
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Department {
    pub id: Option<i64>,
    pub email: String,
    pub name: Option<String>,
    pub code: Option<String>,
    pub head: Option<String>,
    pub size: Option<i64>,
    pub budget: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub manager: Option<String>,
    pub creation_date: Option<String>,
}

impl Entity for Department {
    const NAME: &'static str = "department";
    const TABLE: &'static str = "departments";
    const KEY_FIELD: &'static str = "email";
    const KEY_KIND: FieldKind = FieldKind::Text;

    fn from_key(key: &str) -> Result<Self, String> {
        Ok(Self {
            email: key.to_string(),
            ..Default::default()
        })
    }

    fn key(&self) -> Value {
        Value::Text(self.email.clone())
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn fields() -> &'static [FieldSetter<Self>] {
        const FIELDS: &[FieldSetter<Department>] = field_table!(Department {
            name: String,
            code: String,
            head: String,
            size: i64,
            budget: String,
            location: String,
            phone: String,
            manager: String,
            creation_date: String,
        });
        FIELDS
    }
}

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: Option<i64>,
    pub email: String,
    pub source_id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub phone_number: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub manager_id: Option<i64>,
    pub salary: Option<String>,
    pub hire_date: Option<String>,
    pub age: Option<i64>,
    pub years_of_experience: Option<i64>,
}

impl Entity for Person {
    const NAME: &'static str = "person";
    const TABLE: &'static str = "people";
    const KEY_FIELD: &'static str = "email";
    const KEY_KIND: FieldKind = FieldKind::Text;

    fn from_key(key: &str) -> Result<Self, String> {
        Ok(Self {
            email: key.to_string(),
            ..Default::default()
        })
    }

    fn key(&self) -> Value {
        Value::Text(self.email.clone())
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn fields() -> &'static [FieldSetter<Self>] {
        const FIELDS: &[FieldSetter<Person>] = field_table!(Person {
            source_id: i64,
            first_name: String,
            last_name: String,
            gender: String,
            phone_number: String,
            job_title: String,
            department: String,
            address: String,
            city: String,
            state: String,
            country: String,
            postal_code: String,
            start_time: String,
            end_time: String,
            manager_id: i64,
            salary: String,
            hire_date: String,
            age: i64,
            years_of_experience: i64,
        });
        FIELDS
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Site {
    pub id: Option<i64>,
    pub source_id: String,
    pub name: Option<String>,
    pub cid: Option<String>,
    pub manager: Option<String>,
    pub submanager: Option<String>,
    pub host: Option<bool>,
    pub devteam: Option<String>,
    pub lifetime: Option<i64>,
    pub state: Option<String>,
    pub url: Option<String>,
}

impl Entity for Site {
    const NAME: &'static str = "site";
    const TABLE: &'static str = "sites";
    const KEY_FIELD: &'static str = "source_id";
    const KEY_KIND: FieldKind = FieldKind::Text;

    fn from_key(key: &str) -> Result<Self, String> {
        Ok(Self {
            source_id: key.to_string(),
            ..Default::default()
        })
    }

    fn key(&self) -> Value {
        Value::Text(self.source_id.clone())
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn fields() -> &'static [FieldSetter<Self>] {
        const FIELDS: &[FieldSetter<Site>] = field_table!(Site {
            name: String,
            cid: String,
            manager: String,
            submanager: String,
            host: bool,
            devteam: String,
            lifetime: i64,
            state: String,
            url: String,
        });
        FIELDS
    }
}

// ---------------------------------------------------------------------------
// Kind lookup
// ---------------------------------------------------------------------------

/// Entity names that are upserted rather than appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Department,
    Person,
    Site,
}

impl EntityKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "department" | "departments" => Some(Self::Department),
            "employee" | "employees" | "people" | "person" => Some(Self::Person),
            "site" | "sites" => Some(Self::Site),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Department => Department::TABLE,
            Self::Person => Person::TABLE,
            Self::Site => Site::TABLE,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Department => write!(f, "{}", Department::NAME),
            Self::Person => write!(f, "{}", Person::NAME),
            Self::Site => write!(f, "{}", Site::NAME),
        }
    }
}
