//! Client identity used to tag diagnostics

/// Name and verbosity of a client instance
#[derive(Debug, Clone)]
pub struct Identity {
    base: &'static str,
    name: String,
    verbose: bool,
}

impl Identity {
    pub fn new(base: &'static str) -> Self {
        Self {
            base,
            name: base.to_string(),
            verbose: false,
        }
    }

    /// Append a numeric id to the base name (`Base#id`)
    pub fn set_id(&mut self, id: u32) {
        self.name = format!("{}#{}", self.base, id);
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}
