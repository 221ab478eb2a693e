//! Seed data served by the mock API.

use serde_json::{json, Value};

pub fn companies() -> Vec<Value> {
    vec![
        company(1, "acme.com", "Acme", &["saas", "software"], "us", 120, 2004),
        company(2, "globex.io", "Globex", &["logistics"], "de", 4300, 1989),
        company(3, "initech.com", "Initech", &["software", "consulting"], "us", 850, 1998),
        company(4, "umbrella.fr", "Umbrella", &["biotech"], "fr", 12000, 1978),
        company(5, "hooli.xyz", "Hooli", &["saas", "advertising"], "us", 32000, 2001),
        company(6, "piedpiper.com", "Pied Piper", &["saas", "compression"], "us", 14, 2014),
    ]
}

fn company(
    id: u64,
    domain: &str,
    name: &str,
    industries: &[&str],
    country: &str,
    employees: u64,
    founded: u64,
) -> Value {
    let tld = domain.rsplit('.').next().unwrap_or_default();
    json!({
        "id": id,
        "domain": { "domain": domain, "tld": tld },
        "about": {
            "name": name,
            "industries": industries,
            "totalEmployeesExact": employees,
            "yearFounded": founded,
        },
        "locations": {
            "headquarters": { "country": { "code": country } },
        },
    })
}
