//! Forms for creating, updating and describing rows
//!
//! A [`FormSpec`] declares the editable fields of a model. A [`Form`] binds
//! a spec to submitted data (and optionally to the row being edited),
//! validates it, saves it through the object store and describes itself for
//! clients through [`Form::as_dict`].

use crate::core::query::{as_integer, values_equal};
use crate::core::store::{ObjectStore, Record, StoreResult};
use crate::core::validation::validators;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;

const REQUIRED: &str = "This field is required.";
const INVALID_INTEGER: &str = "Enter a whole number.";
const INVALID_NUMBER: &str = "Enter a number.";
const INVALID_RELATED: &str = "Select a valid choice. That choice is not one of the available choices.";

/// A check run on a cleaned value
pub type FieldValidator = Arc<dyn Fn(&str, &Value) -> Result<(), String> + Send + Sync>;

/// A transformation run on a cleaned value before validators
pub type FieldCleaner = Arc<dyn Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync>;

/// What a form field accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Char,
    Integer,
    Float,
    /// Stored as a decimal string, e.g. `"12.50"`
    Decimal,
    Boolean,
    Choice,
    /// The id of a row of `model`, stored in the `<name>_id` column
    ForeignKey { model: String },
}

/// One field of a form
#[derive(Clone)]
pub struct FormField {
    name: String,
    kind: FieldKind,
    required: bool,
    label: Option<String>,
    help_text: String,
    initial: Option<Value>,
    max_length: Option<usize>,
    min_length: Option<usize>,
    choices: Option<Vec<(Value, String)>>,
    persisted: bool,
    validators: Vec<FieldValidator>,
    cleaners: Vec<FieldCleaner>,
}

impl FormField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            label: None,
            help_text: String::new(),
            initial: None,
            max_length: None,
            min_length: None,
            choices: None,
            persisted: true,
            validators: Vec::new(),
            cleaners: Vec::new(),
        }
    }

    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Char)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn decimal(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Decimal)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// A choice among `(value, label)` pairs
    pub fn choice<V, L>(name: impl Into<String>, choices: impl IntoIterator<Item = (V, L)>) -> Self
    where
        V: Into<Value>,
        L: Into<String>,
    {
        let mut field = Self::new(name, FieldKind::Choice);
        field.choices = Some(
            choices
                .into_iter()
                .map(|(v, l)| (v.into(), l.into()))
                .collect(),
        );
        field
    }

    pub fn foreign_key(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::ForeignKey {
                model: model.into(),
            },
        )
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn help_text(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = help_text.into();
        self
    }

    pub fn initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    /// Validate the field but never write it to the row
    pub fn not_persisted(mut self) -> Self {
        self.persisted = false;
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn cleaner<F>(mut self, cleaner: F) -> Self
    where
        F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.cleaners.push(Arc::new(cleaner));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// The row column the field reads and writes
    pub fn column(&self) -> String {
        match self.kind {
            FieldKind::ForeignKey { .. } => format!("{}_id", self.name),
            _ => self.name.clone(),
        }
    }

    /// Explicit label, or the name with underscores as spaces and a capital
    pub fn label_text(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let spaced = self.name.replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Coerce a submitted value to the field's kind
    fn to_value(&self, raw: Option<&Value>) -> Result<Value, String> {
        let raw = match raw {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v),
        };
        let Some(raw) = raw else {
            if self.kind == FieldKind::Boolean && !self.required {
                return Ok(Value::Bool(false));
            }
            if self.required {
                return Err(REQUIRED.to_string());
            }
            return Ok(match self.kind {
                FieldKind::Char => Value::String(String::new()),
                _ => Value::Null,
            });
        };

        match &self.kind {
            FieldKind::Char => Ok(Value::String(match raw {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })),
            FieldKind::Integer => as_integer(raw)
                .map(Value::from)
                .ok_or_else(|| INVALID_INTEGER.to_string()),
            FieldKind::Float => as_number(raw)
                .map(Value::from)
                .ok_or_else(|| INVALID_NUMBER.to_string()),
            FieldKind::Decimal => match raw {
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Ok(Value::String(s.trim().to_string()))
                }
                Value::Number(n) => Ok(Value::String(n.to_string())),
                _ => Err(INVALID_NUMBER.to_string()),
            },
            FieldKind::Boolean => {
                let checked = match raw {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                    Value::String(s) => {
                        !matches!(s.trim().to_lowercase().as_str(), "false" | "0" | "off")
                    }
                    _ => true,
                };
                if self.required && !checked {
                    return Err(REQUIRED.to_string());
                }
                Ok(Value::Bool(checked))
            }
            FieldKind::Choice => {
                let choices = self.choices.as_deref().unwrap_or_default();
                match choices.iter().find(|(v, _)| values_equal(v, raw)) {
                    Some((value, _)) => Ok(value.clone()),
                    None => Err(format!(
                        "Select a valid choice. {} is not one of the available choices.",
                        display(raw)
                    )),
                }
            }
            FieldKind::ForeignKey { .. } => as_integer(raw)
                .map(Value::from)
                .ok_or_else(|| INVALID_RELATED.to_string()),
        }
    }

    fn clean(&self, raw: Option<&Value>) -> Result<Value, Vec<String>> {
        let mut value = self.to_value(raw).map_err(|e| vec![e])?;
        if value.is_null() {
            return Ok(value);
        }
        for cleaner in &self.cleaners {
            value = cleaner(&self.name, value).map_err(|e| vec![e.to_string()])?;
        }

        let mut errors = Vec::new();
        if self.kind == FieldKind::Char
            && (self.min_length.is_some() || self.max_length.is_some())
        {
            let length = validators::string_length(
                self.min_length.unwrap_or(0),
                self.max_length.unwrap_or(usize::MAX),
            );
            if let Err(message) = length(&self.name, &value) {
                errors.push(message);
            }
        }
        for validator in &self.validators {
            if let Err(message) = validator(&self.name, &value) {
                errors.push(message);
            }
        }
        if errors.is_empty() {
            Ok(value)
        } else {
            Err(errors)
        }
    }

    /// Describe the field for clients
    fn to_dict(&self, prefix: Option<&str>, value: Value) -> Value {
        let html_name = match prefix {
            Some(prefix) => format!("{}-{}", prefix, self.name),
            None => self.name.clone(),
        };
        let mut dict = Map::new();
        dict.insert("name".into(), json!(self.name));
        dict.insert("help_text".into(), json!(self.help_text));
        dict.insert("label".into(), json!(self.label_text()));
        dict.insert("value".into(), value);
        dict.insert("required".into(), json!(self.required));
        dict.insert("auto_id".into(), json!(format!("id_{}", html_name)));
        dict.insert("html_name".into(), json!(html_name));
        if let Some(max) = self.max_length {
            dict.insert("max_length".into(), json!(max));
        }
        if let Some(min) = self.min_length {
            dict.insert("min_length".into(), json!(min));
        }
        if let Some(choices) = &self.choices {
            let choices: Vec<Value> = choices.iter().map(|(v, l)| json!([v, l])).collect();
            dict.insert("choices".into(), Value::Array(choices));
        }
        Value::Object(dict)
    }
}

impl fmt::Debug for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormField")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

// =============================================================================
// Form spec
// =============================================================================

/// Declaration of a form over one model
#[derive(Debug, Clone)]
pub struct FormSpec {
    title: String,
    prefix: Option<String>,
    model: String,
    fields: Vec<FormField>,
}

impl FormSpec {
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prefix: None,
            model: model.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn field(mut self, field: FormField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }
}

// =============================================================================
// Form
// =============================================================================

/// A form instance, bound to submitted data or not
#[derive(Debug, Clone)]
pub struct Form {
    spec: Arc<FormSpec>,
    data: Option<Map<String, Value>>,
    instance: Option<Record>,
    errors: Map<String, Value>,
    cleaned_data: Map<String, Value>,
}

impl Form {
    /// A form over submitted `data`, editing `instance` when given
    pub fn bound(spec: Arc<FormSpec>, data: Map<String, Value>, instance: Option<Record>) -> Self {
        Self {
            spec,
            data: Some(data),
            instance,
            errors: Map::new(),
            cleaned_data: Map::new(),
        }
    }

    /// A form with no submitted data, prefilled from `instance` when given
    pub fn unbound(spec: Arc<FormSpec>, instance: Option<Record>) -> Self {
        Self {
            spec,
            data: None,
            instance,
            errors: Map::new(),
            cleaned_data: Map::new(),
        }
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn instance(&self) -> Option<&Record> {
        self.instance.as_ref()
    }

    /// Field name to list of messages, filled by [`is_valid`](Self::is_valid)
    pub fn errors(&self) -> &Map<String, Value> {
        &self.errors
    }

    pub fn cleaned_data(&self) -> &Map<String, Value> {
        &self.cleaned_data
    }

    /// Clean and validate the submitted data
    ///
    /// Foreign keys must name an existing row, so validation reads the store.
    /// An unbound form is never valid.
    pub async fn is_valid(&mut self, store: &dyn ObjectStore) -> StoreResult<bool> {
        self.errors.clear();
        self.cleaned_data.clear();
        let Some(data) = &self.data else {
            return Ok(false);
        };

        for field in &self.spec.fields {
            match field.clean(data.get(field.name())) {
                Ok(value) => {
                    if let (FieldKind::ForeignKey { model }, Some(id)) = (&field.kind, value.as_i64()) {
                        let lookups = vec![("pk".to_string(), Value::from(id))];
                        if let Err(e) = store.get(model, &lookups).await {
                            if !e.is_lookup_miss() {
                                return Err(e);
                            }
                            self.errors
                                .insert(field.name.clone(), json!([INVALID_RELATED]));
                            continue;
                        }
                    }
                    self.cleaned_data.insert(field.name.clone(), value);
                }
                Err(messages) => {
                    self.errors.insert(field.name.clone(), json!(messages));
                }
            }
        }
        Ok(self.errors.is_empty())
    }

    /// Persist the cleaned data: update the instance or insert a new row
    pub async fn save(&self, store: &dyn ObjectStore) -> StoreResult<Record> {
        let values = self.spec.fields.iter().filter(|f| f.persisted).filter_map(|f| {
            self.cleaned_data
                .get(f.name())
                .map(|value| (f.column(), value.clone()))
        });
        match &self.instance {
            Some(instance) => {
                let mut record = instance.clone();
                for (column, value) in values {
                    record.set(column, value);
                }
                store.save(&record, None).await
            }
            None => store.insert(&self.spec.model, values.collect()).await,
        }
    }

    /// Value shown for `field`: the instance's value, else the declared initial
    pub fn initial_value(&self, field: &FormField) -> Value {
        let from_instance = self
            .instance
            .as_ref()
            .and_then(|record| record.attribute(&field.column()))
            .map(|value| match (&field.kind, value) {
                (FieldKind::Decimal, Value::String(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .unwrap_or(Value::String(s)),
                (_, value) => value,
            });
        match from_instance {
            Some(value) if !is_falsy(&value) => value,
            _ => field.initial.clone().unwrap_or(Value::Null),
        }
    }

    /// Describe the form: title, prefix, per-field metadata and initial data
    pub fn as_dict(&self) -> Value {
        let prefix = self.spec.prefix.as_deref();
        let mut fields = Map::new();
        let mut data = Map::new();
        for field in &self.spec.fields {
            let value = self.initial_value(field);
            data.insert(field.name.clone(), value.clone());
            fields.insert(field.name.clone(), field.to_dict(prefix, value));
        }
        json!({
            "title": self.spec.title,
            "prefix": prefix,
            "fields": fields,
            "data": data,
        })
    }
}
