use bytes::BytesMut;

use crate::{msgpack::encoder, Bins, Value};

/// Value constraint a secondary-index query applies to one bin.
#[derive(Clone, Debug)]
pub enum IndexFilter {
    /// The bin equals the given value.
    Equal { bin_name: String, value: Value },
    /// The bin's integer value lies within the inclusive range.
    Range {
        bin_name: String,
        begin: i64,
        end: i64,
    },
}

/// Description of a scan-with-index-lookup: which namespace and set to
/// read, which bins to return and which index constraint to apply.
#[derive(Clone, Debug)]
pub struct Statement {
    /// Namespace to query.
    pub namespace: String,
    /// Set name, or empty for the whole namespace.
    pub set_name: String,
    /// Bins to return.
    pub bins: Bins,
    /// Optional secondary-index constraint; without one the query walks
    /// every record like a scan.
    pub filter: Option<IndexFilter>,
}

impl Statement {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        bins: impl Into<Bins>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            bins: bins.into(),
            filter: None,
        }
    }

    /// Attach an index constraint.
    #[must_use]
    pub fn with_filter(mut self, filter: IndexFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The wire form of the index constraint: a MessagePack list of
    /// `[bin, kind, values...]`.
    pub(crate) fn filter_range_bytes(&self) -> Option<Vec<u8>> {
        let filter = self.filter.as_ref()?;
        let encoded = match filter {
            IndexFilter::Equal { bin_name, value } => Value::List(vec![
                Value::String(bin_name.clone()),
                Value::Int(0),
                value.clone(),
            ]),
            IndexFilter::Range {
                bin_name,
                begin,
                end,
            } => Value::List(vec![
                Value::String(bin_name.clone()),
                Value::Int(1),
                Value::Int(*begin),
                Value::Int(*end),
            ]),
        };

        let mut bytes = BytesMut::new();
        encoder::pack_value(&mut bytes, &encoded);
        Some(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexFilter, Statement};
    use crate::Bins;

    #[test]
    fn filterless_statement_has_no_range_bytes() {
        let stmt = Statement::new("test", "s", Bins::All);
        assert!(stmt.filter_range_bytes().is_none());
    }

    #[test]
    fn range_filter_encodes() {
        let stmt = Statement::new("test", "s", Bins::All).with_filter(IndexFilter::Range {
            bin_name: "a".to_owned(),
            begin: 1,
            end: 10,
        });
        let bytes = stmt.filter_range_bytes().unwrap();
        // [bin, kind, begin, end]
        assert_eq!(bytes[0], 0x94);
        assert!(!bytes.is_empty());
    }
}
