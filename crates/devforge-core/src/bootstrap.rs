//! In-container bootstrap sequences
//!
//! Each step is a single `sh -c` script executed to completion inside the
//! freshly started container. A non-zero exit aborts project creation.

use crate::ProjectType;

/// Directory the project is mounted at inside the container
pub const WORKSPACE_DIR: &str = "/app";

/// Starts the Vite dev server detached, logging to `/app/frontend.log`
pub const FRONTEND_LAUNCH: &str =
    "cd /app/frontend && nohup npm run dev > /app/frontend.log 2>&1 & echo $! > /app/frontend.pid";

const BACKEND_LAUNCH: &str =
    "cd /app/backend && nohup npm run dev > /app/backend.log 2>&1 & echo $! > /app/backend.pid";

const CREATE_VITE_APP: &str = "cd /app && npm create vite@latest frontend -- --template react-ts";

const INSTALL_FRONTEND: &str = "cd /app/frontend && npm install";

const INSTALL_BACKEND: &str = "cd /app/backend && npm install";

/// One named shell script run during bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapStep {
    pub name: &'static str,
    pub script: String,
}

impl BootstrapStep {
    fn new(name: &'static str, script: impl Into<String>) -> Self {
        Self {
            name,
            script: script.into(),
        }
    }
}

/// Ordered bootstrap steps for `project_type`
pub fn bootstrap_steps(project_type: ProjectType) -> Vec<BootstrapStep> {
    match project_type {
        ProjectType::Mern => vec![
            BootstrapStep::new("create frontend", CREATE_VITE_APP),
            BootstrapStep::new("install frontend dependencies", INSTALL_FRONTEND),
            BootstrapStep::new("write starter files", starter_files_script(true)),
            BootstrapStep::new("configure vite", vite_config_script()),
            BootstrapStep::new("install backend dependencies", INSTALL_BACKEND),
            BootstrapStep::new("start frontend", FRONTEND_LAUNCH),
            BootstrapStep::new("start backend", BACKEND_LAUNCH),
        ],
        ProjectType::React => vec![
            BootstrapStep::new("create frontend", CREATE_VITE_APP),
            BootstrapStep::new("install frontend dependencies", INSTALL_FRONTEND),
            BootstrapStep::new("write starter files", starter_files_script(false)),
            BootstrapStep::new("configure vite", vite_config_script()),
            BootstrapStep::new("start frontend", FRONTEND_LAUNCH),
        ],
        ProjectType::Node | ProjectType::Python => Vec::new(),
    }
}

fn vite_config_script() -> String {
    r#"cat > /app/frontend/vite.config.ts << 'EOF'
import { defineConfig } from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({
  plugins: [react()],
  server: {
    host: '0.0.0.0',
    port: 5173,
    strictPort: true,
    headers: {
      'Access-Control-Allow-Origin': '*',
      'Content-Security-Policy': "frame-ancestors *"
    }
  }
})
EOF
"#
    .to_string()
}

fn starter_files_script(with_backend: bool) -> String {
    let status_check = if with_backend {
        r#"
  const [backend, setBackend] = useState<'checking' | 'connected' | 'error'>('checking');

  useEffect(() => {
    fetch('http://localhost:3001/api/health')
      .then(res => res.json())
      .then(() => setBackend('connected'))
      .catch(() => setBackend('error'));
  }, []);
"#
    } else {
        ""
    };
    let status_line = if with_backend {
        "      <p>Backend API: {backend}</p>\n"
    } else {
        ""
    };

    format!(
        r#"cat > /app/frontend/src/App.tsx << 'APPEOF'
import {{ useState, useEffect }} from 'react';

interface Todo {{
  id: number;
  text: string;
  completed: boolean;
}}

function App() {{
  const [todos, setTodos] = useState<Todo[]>(() =>
    JSON.parse(localStorage.getItem('todos') ?? '[]')
  );
  const [input, setInput] = useState('');
{status_check}
  useEffect(() => {{
    localStorage.setItem('todos', JSON.stringify(todos));
  }}, [todos]);

  const addTodo = () => {{
    if (input.trim()) {{
      setTodos([...todos, {{ id: Date.now(), text: input, completed: false }}]);
      setInput('');
    }}
  }};

  const toggle = (id: number) =>
    setTodos(todos.map(t => (t.id === id ? {{ ...t, completed: !t.completed }} : t)));

  return (
    <main style={{{{ maxWidth: 600, margin: '2rem auto', fontFamily: 'system-ui' }}}}>
      <h1>DevForge Todo App</h1>
{status_line}      <input
        value={{input}}
        onChange={{e => setInput(e.target.value)}}
        onKeyDown={{e => e.key === 'Enter' && addTodo()}}
        placeholder="What needs to be done?"
      />
      <button onClick={{addTodo}}>Add</button>
      <ul>
        {{todos.map(t => (
          <li key={{t.id}} onClick={{() => toggle(t.id)}}
              style={{{{ textDecoration: t.completed ? 'line-through' : 'none' }}}}>
            {{t.text}}
          </li>
        ))}}
      </ul>
    </main>
  );
}}

export default App;
APPEOF

cat > /app/frontend/src/main.tsx << 'MAINEOF'
import {{ StrictMode }} from 'react';
import {{ createRoot }} from 'react-dom/client';
import App from './App';
import './index.css';

createRoot(document.getElementById('root')!).render(
  <StrictMode>
    <App />
  </StrictMode>
);
MAINEOF

cat > /app/frontend/src/index.css << 'CSSEOF'
* {{
  margin: 0;
  padding: 0;
  box-sizing: border-box;
}}

#root {{
  width: 100%;
  min-height: 100vh;
}}
CSSEOF
"#
    )
}
