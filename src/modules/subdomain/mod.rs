// Subdomain discovery sources. Each source queries one public intelligence
// endpoint and stores `{subdomain, source}` records; keyed sources skip
// themselves with a warning when no API key is configured.

pub mod alienvault;
pub mod anubis;
pub mod crtsh;
pub mod securitytrails;
pub mod virustotal;
