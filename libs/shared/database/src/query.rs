use std::fmt;

/// Builds PostgREST query strings (`col=eq.value&order=created_at.desc`).
/// Values are percent-encoded; column names are trusted.
#[derive(Debug, Clone, Default)]
pub struct PostgrestQuery {
    parts: Vec<String>,
}

impl PostgrestQuery {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, op: &str, value: &str) -> Self {
        self.parts
            .push(format!("{}={}.{}", column, op, urlencoding::encode(value)));
        self
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.parts.push(format!("select={}", columns));
        self
    }

    pub fn eq(self, column: &str, value: impl fmt::Display) -> Self {
        self.push(column, "eq", &value.to_string())
    }

    pub fn neq(self, column: &str, value: impl fmt::Display) -> Self {
        self.push(column, "neq", &value.to_string())
    }

    pub fn gte(self, column: &str, value: impl fmt::Display) -> Self {
        self.push(column, "gte", &value.to_string())
    }

    pub fn lte(self, column: &str, value: impl fmt::Display) -> Self {
        self.push(column, "lte", &value.to_string())
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.push(column, "ilike", pattern)
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.parts.push(format!("{}=is.null", column));
        self
    }

    /// `column=in.(a,b,c)`
    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: fmt::Display,
    {
        let joined = values
            .into_iter()
            .map(|v| urlencoding::encode(&v.to_string()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        self.parts.push(format!("{}=in.({})", column, joined));
        self
    }

    /// Array column contains the value (`cs.{value}`).
    pub fn contains(mut self, column: &str, value: &str) -> Self {
        self.parts
            .push(format!("{}=cs.%7B{}%7D", column, urlencoding::encode(value)));
        self
    }

    /// `or=(first_name.ilike.*x*,last_name.ilike.*x*)`
    pub fn or(mut self, conditions: &[String]) -> Self {
        let joined = conditions
            .iter()
            .map(|c| urlencoding::encode(c).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        self.parts.push(format!("or=({})", joined));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.parts.push(format!("order={}.{}", column, direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.parts.push(format!("limit={}", limit));
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.parts.push(format!("offset={}", offset));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Display for PostgrestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("&"))
    }
}
