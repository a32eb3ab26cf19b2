use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One flattened registry record as it lands in the output store.
/// Every field is a plain string so gaps in the raw data never block a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub business_name: String,
    pub registration_id: String,
    pub status: String,
    pub filing_date: String,
    pub agent_name: String,
    pub agent_address: String,
    pub agent_email: String,
}

/// Flatten one raw API record. Missing, null or non-string fields become
/// empty strings, and a missing `agent` object empties all three agent
/// fields without touching the rest.
pub fn extract_record(raw: &Value) -> FlatRecord {
    let agent = raw.get("agent");
    FlatRecord {
        business_name: str_field(raw, "businessName"),
        registration_id: str_field(raw, "registrationId"),
        status: str_field(raw, "status"),
        filing_date: str_field(raw, "filingDate"),
        agent_name: nested_str_field(agent, "name"),
        agent_address: nested_str_field(agent, "address"),
        agent_email: nested_str_field(agent, "email"),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn nested_str_field(value: Option<&Value>, key: &str) -> String {
    value.map(|v| str_field(v, key)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_record_maps_all_fields() {
        let raw = json!({
            "businessName": "Acme Holdings LLC",
            "registrationId": "R-100234",
            "status": "Active",
            "filingDate": "2019-04-17",
            "agent": {
                "name": "Jordan Velez",
                "address": "12 Pine St, Dover DE",
                "email": "jordan@acme.example"
            }
        });

        let record = extract_record(&raw);
        assert_eq!(record.business_name, "Acme Holdings LLC");
        assert_eq!(record.registration_id, "R-100234");
        assert_eq!(record.status, "Active");
        assert_eq!(record.filing_date, "2019-04-17");
        assert_eq!(record.agent_name, "Jordan Velez");
        assert_eq!(record.agent_address, "12 Pine St, Dover DE");
        assert_eq!(record.agent_email, "jordan@acme.example");
    }

    #[test]
    fn missing_agent_leaves_other_fields_intact() {
        let raw = json!({
            "businessName": "Solo Ventures",
            "registrationId": "R-2",
            "status": "Dissolved",
            "filingDate": "2012-01-30"
        });

        let record = extract_record(&raw);
        assert_eq!(record.business_name, "Solo Ventures");
        assert_eq!(record.agent_name, "");
        assert_eq!(record.agent_address, "");
        assert_eq!(record.agent_email, "");
    }

    #[test]
    fn null_and_non_string_fields_default_to_empty() {
        let raw = json!({
            "businessName": null,
            "registrationId": 42,
            "agent": {
                "name": null,
                "address": ["not", "a", "string"]
            }
        });

        let record = extract_record(&raw);
        assert_eq!(record.business_name, "");
        assert_eq!(record.registration_id, "");
        assert_eq!(record.status, "");
        assert_eq!(record.filing_date, "");
        assert_eq!(record.agent_name, "");
        assert_eq!(record.agent_address, "");
        assert_eq!(record.agent_email, "");
    }

    #[test]
    fn null_agent_behaves_like_missing_agent() {
        let raw = json!({ "businessName": "Null Agent Co", "agent": null });

        let record = extract_record(&raw);
        assert_eq!(record.business_name, "Null Agent Co");
        assert_eq!(record.agent_name, "");
    }

    #[test]
    fn non_object_record_yields_all_empty_fields() {
        let record = extract_record(&json!("just a string"));
        assert_eq!(record, FlatRecord {
            business_name: String::new(),
            registration_id: String::new(),
            status: String::new(),
            filing_date: String::new(),
            agent_name: String::new(),
            agent_address: String::new(),
            agent_email: String::new(),
        });
    }
}
