//! Host-side starter files
//!
//! Written into the project directory before the container exists. The
//! frontend is generated later inside the container by Vite, so only the
//! MERN backend is produced here.

use crate::{CoreError, ProjectType, Result};
use serde_json::json;
use std::path::Path;

/// Write the starter files for `project_type` under `root`
pub fn write_scaffold(root: &Path, project_type: ProjectType, project_name: &str) -> Result<()> {
    match project_type {
        ProjectType::Mern => write_mern_backend(&root.join("backend"), project_name),
        ProjectType::React | ProjectType::Node | ProjectType::Python => Ok(()),
    }
}

fn write_mern_backend(backend: &Path, project_name: &str) -> Result<()> {
    let package_json = json!({
        "name": format!("{}-backend", project_name),
        "version": "0.1.0",
        "private": true,
        "type": "module",
        "scripts": {
            "dev": "nodemon --watch src src/index.ts",
            "build": "tsc",
            "start": "node dist/index.js"
        },
        "dependencies": {
            "express": "^4.18.2",
            "cors": "^2.8.5",
            "dotenv": "^16.3.1",
            "mongoose": "^8.0.3"
        },
        "devDependencies": {
            "@types/express": "^4.17.21",
            "@types/cors": "^2.8.17",
            "@types/node": "^20.10.5",
            "nodemon": "^3.0.2",
            "ts-node": "^10.9.2",
            "typescript": "^5.3.3"
        }
    });

    let tsconfig = json!({
        "compilerOptions": {
            "target": "ES2020",
            "module": "ESNext",
            "moduleResolution": "node",
            "esModuleInterop": true,
            "strict": true,
            "skipLibCheck": true,
            "outDir": "./dist",
            "rootDir": "./src"
        },
        "include": ["src/**/*"]
    });

    write_file(
        &backend.join("package.json"),
        &serde_json::to_string_pretty(&package_json)?,
    )?;
    write_file(&backend.join("src").join("index.ts"), &backend_entry(project_name))?;
    write_file(
        &backend.join("tsconfig.json"),
        &serde_json::to_string_pretty(&tsconfig)?,
    )?;

    tracing::debug!("Wrote MERN backend scaffold to {}", backend.display());
    Ok(())
}

fn backend_entry(project_name: &str) -> String {
    format!(
        r#"import express from 'express';
import cors from 'cors';

const app = express();
const PORT = process.env.BACKEND_PORT || 3001;

app.use(cors());
app.use(express.json());

app.get('/api/health', (req, res) => {{
  res.json({{ status: 'ok', message: '{} backend is running' }});
}});

app.listen(PORT, () => {{
  console.log(`Server is running on port ${{PORT}}`);
}});
"#,
        project_name.replace('\'', "\\'")
    )
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::Scaffold(format!("{}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, content)
        .map_err(|e| CoreError::Scaffold(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mern_writes_backend() {
        let tmp = tempfile::tempdir().unwrap();
        write_scaffold(tmp.path(), ProjectType::Mern, "shop").unwrap();

        let backend = tmp.path().join("backend");
        let pkg: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(backend.join("package.json")).unwrap())
                .unwrap();
        assert_eq!(pkg["name"], "shop-backend");
        assert_eq!(pkg["scripts"]["dev"], "nodemon --watch src src/index.ts");

        let index = std::fs::read_to_string(backend.join("src/index.ts")).unwrap();
        assert!(index.contains("shop backend is running"));
        assert!(index.contains("${PORT}"));
        assert!(backend.join("tsconfig.json").exists());
    }

    #[test]
    fn test_other_types_write_nothing() {
        for ty in [ProjectType::React, ProjectType::Node, ProjectType::Python] {
            let tmp = tempfile::tempdir().unwrap();
            write_scaffold(tmp.path(), ty, "x").unwrap();
            assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_unwritable_root_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();
        let err = write_scaffold(&file, ProjectType::Mern, "x").unwrap_err();
        assert!(matches!(err, CoreError::Scaffold(_)));
    }
}
