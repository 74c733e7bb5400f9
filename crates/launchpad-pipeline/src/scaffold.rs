//! Variable substitution and the minimal scaffold pushed when a job names no template.

use std::collections::HashMap;

use launchpad_types::RenderedFile;

use crate::services::TemplateVariables;

/// Expand `${key}` placeholders in a string using the provided variables.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}

/// First `${...}` placeholder left in `text`, if any.
pub fn unresolved_placeholder(text: &str) -> Option<&str> {
    let start = text.find("${")?;
    let end = text[start..].find('}')?;
    Some(&text[start..start + end + 1])
}

const GITIGNORE: &str = "\
# Dependencies
node_modules/
.pnp
.pnp.js

# Testing
coverage/

# Production
build/
dist/

# Misc
.DS_Store
.env*.local

# Logs
npm-debug.log*
yarn-debug.log*
yarn-error.log*
";

const README: &str = "\
# ${projectName}

${description}

## Getting Started

Add your application code here.

## Deployment

Manifests live under `k8s/`. Each environment has an overlay in
`k8s/overlays/<environment>` that the GitOps controller reconciles from
the `${repositoryBranch}` branch.
";

const BASE_KUSTOMIZATION: &str = "\
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization

resources:
  - deployment.yaml
  - service.yaml
";

const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: ${projectSlug}
spec:
  replicas: ${replicas}
  selector:
    matchLabels:
      app: ${projectSlug}
  template:
    metadata:
      labels:
        app: ${projectSlug}
    spec:
      containers:
      - name: ${projectSlug}
        image: ${registry}/${projectSlug}:latest
        ports:
        - containerPort: ${port}
";

const SERVICE: &str = "\
apiVersion: v1
kind: Service
metadata:
  name: ${projectSlug}
spec:
  selector:
    app: ${projectSlug}
  ports:
  - port: 80
    targetPort: ${port}
";

const OVERLAYS: [(&str, &str); 3] = [
    ("development", "dev-"),
    ("staging", "staging-"),
    ("production", "prod-"),
];

/// Files pushed into a new repository when no template applies.
pub fn default_scaffold(variables: &TemplateVariables) -> Vec<RenderedFile> {
    let vars = variables.to_map();
    let mut files = vec![
        RenderedFile::new(".gitignore", GITIGNORE),
        RenderedFile::new("README.md", expand_variables(README, &vars)),
        RenderedFile::new("k8s/base/kustomization.yaml", BASE_KUSTOMIZATION),
        RenderedFile::new("k8s/base/deployment.yaml", expand_variables(DEPLOYMENT, &vars)),
        RenderedFile::new("k8s/base/service.yaml", expand_variables(SERVICE, &vars)),
    ];
    for (overlay, prefix) in OVERLAYS {
        files.push(RenderedFile::new(
            format!("k8s/overlays/{overlay}/kustomization.yaml"),
            format!(
                "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\n\nresources:\n  - ../../base\n\nnamePrefix: {prefix}\n"
            ),
        ));
    }
    files
}
